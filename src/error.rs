//! Error types for the amplicon-stats library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum AmpliconError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid count value '{value}' at row {row}, column {col}")]
    InvalidCount {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Sample ID mismatch: {0}")]
    SampleMismatch(String),

    #[error("Missing column '{0}' in metadata")]
    MissingColumn(String),

    #[error("Invalid level '{value}' for column '{column}'")]
    InvalidLevel { column: String, value: String },

    #[error("Newick parse error: {0}")]
    TreeParse(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Insufficient groups: {0}")]
    InsufficientGroups(String),

    #[error("Estimation error: {0}")]
    EstimationError(String),

    #[error("Not computable: {0}")]
    NotComputable(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AmpliconError {
    /// True for failures that invalidate the whole pipeline (misaligned or
    /// malformed inputs) as opposed to a single statistical test.
    pub fn is_structural(&self) -> bool {
        !matches!(
            self,
            AmpliconError::InsufficientGroups(_)
                | AmpliconError::EstimationError(_)
                | AmpliconError::NotComputable(_)
                | AmpliconError::Numerical(_)
        )
    }

    /// Short machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            AmpliconError::Io(_) => "io",
            AmpliconError::Csv(_) => "csv",
            AmpliconError::InvalidCount { .. } => "invalid_count",
            AmpliconError::DimensionMismatch(_) => "dimension_mismatch",
            AmpliconError::SampleMismatch(_) => "sample_mismatch",
            AmpliconError::MissingColumn(_) => "missing_column",
            AmpliconError::InvalidLevel { .. } => "invalid_level",
            AmpliconError::TreeParse(_) => "tree_parse",
            AmpliconError::EmptyData(_) => "empty_data",
            AmpliconError::InvalidParameter(_) => "invalid_parameter",
            AmpliconError::InsufficientGroups(_) => "insufficient_groups",
            AmpliconError::EstimationError(_) => "estimation_error",
            AmpliconError::NotComputable(_) => "not_computable",
            AmpliconError::Numerical(_) => "numerical",
            AmpliconError::Yaml(_) => "yaml",
            AmpliconError::Json(_) => "json",
        }
    }

    /// True when the failure is the small-sample "not computable" outcome.
    pub fn is_not_computable(&self) -> bool {
        matches!(self, AmpliconError::NotComputable(_))
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, AmpliconError>;
