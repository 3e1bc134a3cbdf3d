//! Per-taxon differential abundance results.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Whether a taxon could be tested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DaStatus {
    Tested,
    /// No p-value; the reason is kept for reporting.
    NotComputable(String),
}

/// Two levels of one factor compared by a differential abundance test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contrast {
    pub factor: crate::data::Factor,
    /// Level in the numerator of the fold change.
    pub numerator: String,
    /// Reference level.
    pub denominator: String,
}

impl std::fmt::Display for Contrast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} vs {}", self.factor, self.numerator, self.denominator)
    }
}

/// Significance requires both an adjusted p-value below `alpha` and an
/// absolute log2 fold change above `lfc_threshold`.
pub fn is_significant(
    p_adjusted: Option<f64>,
    log2_fold_change: Option<f64>,
    alpha: f64,
    lfc_threshold: f64,
) -> bool {
    match (p_adjusted, log2_fold_change) {
        (Some(p), Some(lfc)) => p < alpha && lfc.abs() > lfc_threshold,
        _ => false,
    }
}

/// Result for a single taxon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaResult {
    pub taxon_id: String,
    pub phylum: String,
    /// Mean of size-factor normalised counts over the contrast samples.
    pub base_mean: f64,
    pub log2_fold_change: Option<f64>,
    pub lfc_se: Option<f64>,
    /// Wald z statistic.
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub p_adjusted: Option<f64>,
    /// Fraction of contrast samples with a non-zero count.
    pub prevalence: f64,
    pub significant: bool,
    pub status: DaStatus,
}

impl DaResult {
    /// A taxon that could not be fitted.
    pub fn not_computable(taxon_id: String, phylum: String, base_mean: f64, prevalence: f64, reason: &str) -> Self {
        Self {
            taxon_id,
            phylum,
            base_mean,
            log2_fold_change: None,
            lfc_se: None,
            statistic: None,
            p_value: None,
            p_adjusted: None,
            prevalence,
            significant: false,
            status: DaStatus::NotComputable(reason.to_string()),
        }
    }
}

/// Collection of DA results for one contrast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaResultSet {
    pub contrast: Contrast,
    pub alpha: f64,
    pub lfc_threshold: f64,
    pub results: Vec<DaResult>,
}

impl DaResultSet {
    /// Number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results sorted by adjusted p-value, untested taxa last.
    pub fn sorted_by_padj(&self) -> Vec<&DaResult> {
        let mut sorted: Vec<_> = self.results.iter().collect();
        sorted.sort_by(|a, b| cmp_option(a.p_adjusted, b.p_adjusted));
        sorted
    }

    /// Significant taxa.
    pub fn significant(&self) -> Vec<&DaResult> {
        self.results.iter().filter(|r| r.significant).collect()
    }

    /// Counts of tested, significant and enriched/depleted taxa.
    pub fn summary(&self) -> ResultSummary {
        let significant = self.significant();
        ResultSummary {
            total: self.len(),
            tested: self
                .results
                .iter()
                .filter(|r| r.status == DaStatus::Tested)
                .count(),
            significant: significant.len(),
            enriched: significant
                .iter()
                .filter(|r| r.log2_fold_change.is_some_and(|l| l > 0.0))
                .count(),
            depleted: significant
                .iter()
                .filter(|r| r.log2_fold_change.is_some_and(|l| l < 0.0))
                .count(),
        }
    }

    /// Write results to TSV file. Absent values are empty cells.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(
            writer,
            "taxon_id\tphylum\tcontrast\tbase_mean\tlog2_fold_change\tlfc_se\tstatistic\tp_value\tp_adjusted\tprevalence\tsignificant\tstatus"
        )?;

        for r in &self.results {
            let status = match &r.status {
                DaStatus::Tested => "tested".to_string(),
                DaStatus::NotComputable(reason) => format!("not_computable: {}", reason),
            };
            writeln!(
                writer,
                "{}\t{}\t{}\t{:.4}\t{}\t{}\t{}\t{}\t{}\t{:.4}\t{}\t{}",
                r.taxon_id,
                r.phylum,
                self.contrast,
                r.base_mean,
                fmt_opt(r.log2_fold_change, false),
                fmt_opt(r.lfc_se, false),
                fmt_opt(r.statistic, false),
                fmt_opt(r.p_value, true),
                fmt_opt(r.p_adjusted, true),
                r.prevalence,
                r.significant,
                status
            )?;
        }

        Ok(())
    }

    /// Iterate over results.
    pub fn iter(&self) -> impl Iterator<Item = &DaResult> {
        self.results.iter()
    }
}

fn fmt_opt(v: Option<f64>, scientific: bool) -> String {
    match v {
        Some(x) if scientific => format!("{:.4e}", x),
        Some(x) => format!("{:.6}", x),
        None => String::new(),
    }
}

/// Ascending order with `None` after every value.
pub(crate) fn cmp_option(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Summary statistics for a result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub tested: usize,
    pub significant: usize,
    pub enriched: usize,
    pub depleted: usize,
}

impl std::fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Taxa: {} ({} tested)", self.total, self.tested)?;
        writeln!(
            f,
            "Significant: {} ({} enriched, {} depleted)",
            self.significant, self.enriched, self.depleted
        )
    }
}
