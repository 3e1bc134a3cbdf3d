//! Within-sample (alpha) diversity.
//!
//! All indices take raw counts of one sample. Proportions are `p_i = n_i / N`.
//!
//! - Observed: number of taxa with `n_i > 0`
//! - Chao1 (bias-corrected): `S_obs + F1(F1 - 1) / (2(F2 + 1))`
//! - ACE: abundance-based coverage estimator with rare threshold 10
//! - Shannon: `-Σ p_i ln p_i`
//! - Simpson: `1 - Σ p_i²`
//! - InvSimpson: `1 / Σ p_i²`

use crate::data::AbundanceTable;
use crate::error::{AmpliconError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Counts at or below this are "rare" for ACE.
pub const ACE_RARE_THRESHOLD: u64 = 10;

/// An alpha diversity index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlphaMetric {
    Observed,
    Chao1,
    Ace,
    Shannon,
    Simpson,
    InvSimpson,
}

impl AlphaMetric {
    pub const ALL: [AlphaMetric; 6] = [
        AlphaMetric::Observed,
        AlphaMetric::Chao1,
        AlphaMetric::Ace,
        AlphaMetric::Shannon,
        AlphaMetric::Simpson,
        AlphaMetric::InvSimpson,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AlphaMetric::Observed => "Observed",
            AlphaMetric::Chao1 => "Chao1",
            AlphaMetric::Ace => "ACE",
            AlphaMetric::Shannon => "Shannon",
            AlphaMetric::Simpson => "Simpson",
            AlphaMetric::InvSimpson => "InvSimpson",
        }
    }

    /// Value for one sample; `None` where the index is undefined.
    pub fn compute(&self, counts: &[u64]) -> Option<f64> {
        match self {
            AlphaMetric::Observed => Some(observed(counts) as f64),
            AlphaMetric::Chao1 => Some(chao1(counts)),
            AlphaMetric::Ace => ace(counts),
            AlphaMetric::Shannon => shannon(counts),
            AlphaMetric::Simpson => simpson(counts),
            AlphaMetric::InvSimpson => inv_simpson(counts),
        }
    }
}

impl std::fmt::Display for AlphaMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for AlphaMetric {
    type Err = AmpliconError;

    fn from_str(s: &str) -> Result<Self> {
        AlphaMetric::ALL
            .iter()
            .copied()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AmpliconError::InvalidParameter(format!("unknown alpha metric '{}'", s)))
    }
}

/// Number of taxa observed.
pub fn observed(counts: &[u64]) -> usize {
    counts.iter().filter(|&&c| c > 0).count()
}

/// Bias-corrected Chao1.
pub fn chao1(counts: &[u64]) -> f64 {
    let s_obs = observed(counts) as f64;
    let f1 = counts.iter().filter(|&&c| c == 1).count() as f64;
    let f2 = counts.iter().filter(|&&c| c == 2).count() as f64;
    s_obs + f1 * (f1 - 1.0) / (2.0 * (f2 + 1.0))
}

/// Abundance-based coverage estimator. `None` when every rare taxon is a
/// singleton (sample coverage estimate of zero).
pub fn ace(counts: &[u64]) -> Option<f64> {
    let s_abund = counts.iter().filter(|&&c| c > ACE_RARE_THRESHOLD).count() as f64;
    let rare: Vec<u64> = counts
        .iter()
        .copied()
        .filter(|&c| c > 0 && c <= ACE_RARE_THRESHOLD)
        .collect();
    if rare.is_empty() {
        return Some(s_abund);
    }
    let s_rare = rare.len() as f64;
    let n_rare: u64 = rare.iter().sum();
    let f1 = rare.iter().filter(|&&c| c == 1).count() as f64;
    let coverage = 1.0 - f1 / n_rare as f64;
    if coverage <= 0.0 {
        return None;
    }
    let sum_ff: f64 = (1..=ACE_RARE_THRESHOLD)
        .map(|i| {
            let fi = rare.iter().filter(|&&c| c == i).count() as f64;
            (i * (i - 1)) as f64 * fi
        })
        .sum();
    let n = n_rare as f64;
    let gamma_sq = ((s_rare / coverage) * sum_ff / (n * (n - 1.0)) - 1.0).max(0.0);
    Some(s_abund + s_rare / coverage + f1 / coverage * gamma_sq)
}

fn proportions(counts: &[u64]) -> Option<Vec<f64>> {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return None;
    }
    Some(
        counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| c as f64 / total as f64)
            .collect(),
    )
}

/// Shannon entropy (natural log).
pub fn shannon(counts: &[u64]) -> Option<f64> {
    proportions(counts).map(|p| -p.iter().map(|&pi| pi * pi.ln()).sum::<f64>())
}

/// Gini-Simpson index `1 - Σ p²`.
pub fn simpson(counts: &[u64]) -> Option<f64> {
    proportions(counts).map(|p| 1.0 - p.iter().map(|pi| pi * pi).sum::<f64>())
}

/// Inverse Simpson `1 / Σ p²`.
pub fn inv_simpson(counts: &[u64]) -> Option<f64> {
    proportions(counts).map(|p| 1.0 / p.iter().map(|pi| pi * pi).sum::<f64>())
}

/// Alpha diversity of every sample of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlphaTable {
    pub sample_ids: Vec<String>,
    pub metrics: Vec<AlphaMetric>,
    /// `values[sample][metric]`.
    pub values: Vec<Vec<Option<f64>>>,
}

impl AlphaTable {
    /// Compute the given metrics for every sample.
    pub fn compute(table: &AbundanceTable, metrics: &[AlphaMetric]) -> Result<Self> {
        if table.n_samples() == 0 || table.n_taxa() == 0 {
            return Err(AmpliconError::EstimationError(format!(
                "alpha diversity needs samples and taxa (have {} × {})",
                table.n_samples(),
                table.n_taxa()
            )));
        }
        let values = table
            .counts()
            .sample_profiles()
            .par_iter()
            .map(|profile| metrics.iter().map(|m| m.compute(profile)).collect())
            .collect();
        Ok(Self {
            sample_ids: table.sample_ids().to_vec(),
            metrics: metrics.to_vec(),
            values,
        })
    }

    /// All six indices.
    pub fn compute_all(table: &AbundanceTable) -> Result<Self> {
        Self::compute(table, &AlphaMetric::ALL)
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Values of one metric in sample order.
    pub fn metric_values(&self, metric: AlphaMetric) -> Result<Vec<Option<f64>>> {
        let col = self
            .metrics
            .iter()
            .position(|m| *m == metric)
            .ok_or_else(|| AmpliconError::MissingColumn(metric.name().to_string()))?;
        Ok(self.values.iter().map(|row| row[col]).collect())
    }

    /// Value for one sample.
    pub fn get(&self, sample_id: &str, metric: AlphaMetric) -> Option<f64> {
        let row = self.sample_ids.iter().position(|s| s == sample_id)?;
        let col = self.metrics.iter().position(|m| *m == metric)?;
        self.values[row][col]
    }

    /// Write as TSV, empty cells for undefined values.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write!(writer, "sample_id")?;
        for m in &self.metrics {
            write!(writer, "\t{}", m)?;
        }
        writeln!(writer)?;
        for (id, row) in self.sample_ids.iter().zip(&self.values) {
            write!(writer, "{}", id)?;
            for v in row {
                match v {
                    Some(x) => write!(writer, "\t{:.6}", x)?,
                    None => write!(writer, "\t")?,
                }
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}
