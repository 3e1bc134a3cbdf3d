//! Filtering primitives for abundance tables.

pub mod prevalence;

pub use prevalence::{
    filter_prevalence, FilterOutcome, PhylumPrevalence, PrevalenceFilter, PrevalenceRow,
    PrevalenceTable,
};
