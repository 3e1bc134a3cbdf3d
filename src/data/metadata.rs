//! Per-sample covariates.
//!
//! Columns are generic [`Variable`]s loaded from TSV. The study factors
//! (`zone`, `season`, `depth`, `depth_group`) are validated against their
//! controlled domains with [`Metadata::validate_factors`].

use crate::data::covariates::{Depth, Factor};
use crate::error::{AmpliconError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One metadata cell. Columns whose values all parse as numbers are read as
/// `Continuous`; study factors map either form onto their levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    Categorical(String),
    Continuous(f64),
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as categorical string.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }
}

/// Sample metadata containing variables for each sample.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Sample IDs in order.
    sample_ids: Vec<String>,
    /// Column names.
    column_names: Vec<String>,
    /// Data stored as sample_id -> column_name -> Variable.
    data: HashMap<String, HashMap<String, Variable>>,
}

impl Metadata {
    /// Load metadata from a TSV file.
    ///
    /// Expected format:
    /// - First row: header with column names (first column is sample ID)
    /// - Subsequent rows: sample ID followed by variable values
    ///
    /// Columns are continuous if all values parse as numbers, otherwise
    /// categorical.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        // Parse header
        let header_line = lines
            .next()
            .ok_or_else(|| AmpliconError::EmptyData("Empty metadata file".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').collect();
        if header.len() < 2 {
            return Err(AmpliconError::EmptyData(
                "Metadata must have at least one variable column".to_string(),
            ));
        }
        let column_names: Vec<String> = header[1..].iter().map(|s| s.to_string()).collect();

        // First pass: collect all values to infer types
        let mut raw_data: Vec<(String, Vec<String>)> = Vec::new();
        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.is_empty() {
                continue;
            }
            let sample_id = fields[0].to_string();
            let values: Vec<String> = fields[1..]
                .iter()
                .map(|s| s.to_string())
                .collect();
            raw_data.push((sample_id, values));
        }

        Self::from_records(column_names, raw_data)
    }

    /// Build metadata from raw string records, inferring column types the same
    /// way as [`Metadata::from_tsv`]. Empty and `NA` values are missing.
    pub fn from_records(
        column_names: Vec<String>,
        raw_data: Vec<(String, Vec<String>)>,
    ) -> Result<Self> {
        if raw_data.is_empty() {
            return Err(AmpliconError::EmptyData("No samples in metadata".to_string()));
        }
        let mut seen = HashSet::new();
        for (sample_id, _) in &raw_data {
            if !seen.insert(sample_id.as_str()) {
                return Err(AmpliconError::SampleMismatch(format!(
                    "duplicate sample ID '{}' in metadata",
                    sample_id
                )));
            }
        }

        let numeric: Vec<bool> = (0..column_names.len())
            .map(|col_idx| {
                raw_data.iter().all(|(_, values)| {
                    values
                        .get(col_idx)
                        .map(|v| v.trim())
                        .map_or(true, |v| is_missing_token(v) || v.parse::<f64>().is_ok())
                })
            })
            .collect();

        // Build metadata
        let mut sample_ids = Vec::new();
        let mut data = HashMap::new();

        for (sample_id, values) in raw_data {
            sample_ids.push(sample_id.clone());
            let mut sample_data = HashMap::new();

            for (col_idx, col_name) in column_names.iter().enumerate() {
                let var = match values.get(col_idx).map(|v| v.trim()) {
                    None => Variable::Missing,
                    Some(raw) if is_missing_token(raw) => Variable::Missing,
                    Some(raw) if numeric[col_idx] => raw
                        .parse::<f64>()
                        .map(Variable::Continuous)
                        .unwrap_or(Variable::Missing),
                    Some(raw) => Variable::Categorical(raw.to_string()),
                };
                sample_data.insert(col_name.clone(), var);
            }
            data.insert(sample_id, sample_data);
        }

        Ok(Self {
            sample_ids,
            column_names,
            data,
        })
    }

    /// Sample IDs in order.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of samples.
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Number of columns (variables).
    pub fn n_columns(&self) -> usize {
        self.column_names.len()
    }

    /// Get a variable value for a specific sample and column.
    pub fn get(&self, sample_id: &str, column: &str) -> Option<&Variable> {
        self.data.get(sample_id).and_then(|m| m.get(column))
    }

    /// Get all values for a column.
    pub fn column(&self, column: &str) -> Result<Vec<&Variable>> {
        if !self.column_names.contains(&column.to_string()) {
            return Err(AmpliconError::MissingColumn(column.to_string()));
        }
        Ok(self
            .sample_ids
            .iter()
            .map(|sid| {
                self.data
                    .get(sid)
                    .and_then(|m| m.get(column))
                    .unwrap_or(&Variable::Missing)
            })
            .collect())
    }

    /// Subset metadata to only include specified samples.
    pub fn subset_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let mut new_data = HashMap::new();
        let mut new_sample_ids = Vec::new();

        for sid in sample_ids {
            if let Some(sample_data) = self.data.get(sid) {
                new_data.insert(sid.clone(), sample_data.clone());
                new_sample_ids.push(sid.clone());
            } else {
                return Err(AmpliconError::SampleMismatch(format!(
                    "Sample '{}' not found in metadata",
                    sid
                )));
            }
        }

        Ok(Self {
            sample_ids: new_sample_ids,
            column_names: self.column_names.clone(),
            data: new_data,
        })
    }

    /// Align metadata to match the sample order in a count matrix.
    pub fn align_to(&self, sample_ids: &[String]) -> Result<Self> {
        self.subset_samples(sample_ids)
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.column_names.contains(&column.to_string())
    }

    /// Values of a study factor as canonical level labels, in sample order.
    ///
    /// Missing values are `None`. Values outside the factor's domain fail with
    /// `InvalidLevel`.
    pub fn factor_values(&self, factor: Factor) -> Result<Vec<Option<String>>> {
        self.column(factor.column())?
            .into_iter()
            .map(|v| match variable_label(v) {
                Some(raw) => factor.canonical(&raw).map(|l| Some(l.to_string())),
                None => Ok(None),
            })
            .collect()
    }

    /// Check every study factor column present against its controlled domain.
    pub fn validate_factors(&self) -> Result<()> {
        for factor in Factor::ALL {
            if self.has_column(factor.column()) {
                self.factor_values(factor)?;
            }
        }
        Ok(())
    }

    /// Add (or replace) `depth_group` derived from `depth`.
    pub fn with_depth_group(mut self) -> Result<Self> {
        let depth_col = Factor::Depth.column();
        let group_col = Factor::DepthGroup.column().to_string();
        let depths = self.column(depth_col)?;
        let mut groups = Vec::with_capacity(depths.len());
        for v in depths {
            let group = match variable_label(v) {
                Some(raw) => Variable::Categorical(raw.parse::<Depth>()?.group().label().to_string()),
                None => Variable::Missing,
            };
            groups.push(group);
        }
        for (sid, group) in self.sample_ids.iter().zip(groups) {
            if let Some(sample_data) = self.data.get_mut(sid) {
                sample_data.insert(group_col.clone(), group);
            }
        }
        if !self.has_column(&group_col) {
            self.column_names.push(group_col);
        }
        Ok(self)
    }

    /// Indices of samples with no missing value in any of `factors`.
    pub fn complete_cases(&self, factors: &[Factor]) -> Result<Vec<usize>> {
        let mut keep = vec![true; self.n_samples()];
        for factor in factors {
            for (i, v) in self.factor_values(*factor)?.iter().enumerate() {
                if v.is_none() {
                    keep[i] = false;
                }
            }
        }
        Ok(keep
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect())
    }
}

fn is_missing_token(raw: &str) -> bool {
    raw.is_empty() || raw == "NA" || raw == "na"
}

/// String form of a value, with whole numbers printed without a fraction.
fn variable_label(v: &Variable) -> Option<String> {
    match v {
        Variable::Categorical(s) => Some(s.clone()),
        Variable::Continuous(x) if x.fract() == 0.0 => Some(format!("{}", *x as i64)),
        Variable::Continuous(x) => Some(x.to_string()),
        Variable::Missing => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_metadata() {
        let file = create_study_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();

        assert_eq!(meta.n_samples(), 4);
        assert_eq!(meta.n_columns(), 3);
        assert_eq!(meta.sample_ids(), &["F1", "B1", "I1", "I2"]);
        assert_eq!(meta.column_names(), &["zone", "season", "depth"]);
    }

    #[test]
    fn test_numeric_columns_read_as_continuous() {
        let file = create_study_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();

        assert_eq!(meta.get("F1", "zone").unwrap().as_categorical(), Some("Fringe"));
        assert_eq!(meta.get("B1", "depth"), Some(&Variable::Continuous(20.0)));
    }

    #[test]
    fn test_subset_samples() {
        let file = create_study_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();

        let subset = meta.subset_samples(&["I1".to_string(), "F1".to_string()]).unwrap();
        assert_eq!(subset.sample_ids(), &["I1", "F1"]);
        assert!(meta.subset_samples(&["X9".to_string()]).is_err());
    }

    #[test]
    fn test_missing_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample_id\tzone\tdepth").unwrap();
        writeln!(file, "S1\tBasin\t5").unwrap();
        writeln!(file, "S2\tFringe\tNA").unwrap();
        writeln!(file, "S3\t\t40").unwrap();
        file.flush().unwrap();

        let meta = Metadata::from_tsv(file.path()).unwrap();

        assert!(meta.get("S2", "depth").unwrap().is_missing());
        assert!(meta.get("S3", "zone").unwrap().is_missing());
        assert_eq!(meta.get("S3", "depth"), Some(&Variable::Continuous(40.0)));
    }

    fn create_study_tsv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample_id\tzone\tseason\tdepth").unwrap();
        writeln!(file, "F1\tFringe\tdry\t5").unwrap();
        writeln!(file, "B1\tbasin\tflood\t20").unwrap();
        writeln!(file, "I1\tImpaired\tdry\t40").unwrap();
        writeln!(file, "I2\tImpaired\tNA\t5").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_factor_values_canonical() {
        let file = create_study_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();
        // depth is read as a number but still maps onto its levels
        assert_eq!(meta.get("I1", "depth"), Some(&Variable::Continuous(40.0)));
        let depths = meta.factor_values(Factor::Depth).unwrap();
        assert_eq!(depths[2].as_deref(), Some("40"));
        let zones = meta.factor_values(Factor::Zone).unwrap();
        assert_eq!(zones[1].as_deref(), Some("Basin"));
        let seasons = meta.factor_values(Factor::Season).unwrap();
        assert_eq!(seasons[3], None);
        assert!(meta.validate_factors().is_ok());
    }

    #[test]
    fn test_with_depth_group() {
        let file = create_study_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap().with_depth_group().unwrap();
        let groups = meta.factor_values(Factor::DepthGroup).unwrap();
        assert_eq!(
            groups,
            vec![
                Some("5".to_string()),
                Some("20-40".to_string()),
                Some("20-40".to_string()),
                Some("5".to_string())
            ]
        );
    }

    #[test]
    fn test_invalid_level_rejected() {
        let meta = Metadata::from_records(
            vec!["zone".to_string()],
            vec![("S1".to_string(), vec!["Lagoon".to_string()])],
        )
        .unwrap();
        assert!(matches!(
            meta.validate_factors(),
            Err(AmpliconError::InvalidLevel { .. })
        ));
    }

    #[test]
    fn test_complete_cases_and_duplicates() {
        let file = create_study_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();
        assert_eq!(meta.complete_cases(&[Factor::Zone]).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(
            meta.complete_cases(&[Factor::Zone, Factor::Season]).unwrap(),
            vec![0, 1, 2]
        );

        let dup = Metadata::from_records(
            vec!["zone".to_string()],
            vec![
                ("S1".to_string(), vec!["Basin".to_string()]),
                ("S1".to_string(), vec!["Fringe".to_string()]),
            ],
        );
        assert!(dup.is_err());
    }
}
