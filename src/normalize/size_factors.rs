//! Median-of-ratios size factors with the "poscounts" geometric mean.
//!
//! The reference for each taxon is `exp(Σ_{y>0} ln y / n)`, the geometric
//! mean over positive counts divided by all samples, so taxa with zeros in
//! some samples still contribute. A sample's size factor is the median of
//! `y / reference` over its positive counts. Factors are rescaled to a
//! geometric mean of one.
//!
//! # Reference
//!
//! Anders S, Huber W. Differential expression analysis for sequence count
//! data. Genome Biology 11, R106 (2010).

use crate::data::CountMatrix;
use crate::error::{AmpliconError, Result};
use serde::{Deserialize, Serialize};

/// Size factors per sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeFactors {
    pub sample_ids: Vec<String>,
    pub factors: Vec<f64>,
}

impl SizeFactors {
    /// Natural-log offsets for a log-link model.
    pub fn log_offsets(&self) -> Vec<f64> {
        self.factors.iter().map(|s| s.ln()).collect()
    }
}

/// Estimate size factors. Fails with `EstimationError` when a sample has no
/// positive count against a taxon with a positive reference.
pub fn size_factors(counts: &CountMatrix) -> Result<SizeFactors> {
    let n_samples = counts.n_samples();
    let n_taxa = counts.n_taxa();
    if n_samples == 0 || n_taxa == 0 {
        return Err(AmpliconError::EmptyData(
            "size factors need at least one sample and one taxon".to_string(),
        ));
    }

    let log_geo_means: Vec<f64> = (0..n_taxa)
        .map(|t| {
            let row = counts.taxon_dense(t);
            let log_sum: f64 = row.iter().filter(|&&c| c > 0).map(|&c| (c as f64).ln()).sum();
            if row.iter().any(|&c| c > 0) {
                log_sum / n_samples as f64
            } else {
                f64::NEG_INFINITY
            }
        })
        .collect();

    let mut log_factors = Vec::with_capacity(n_samples);
    for s in 0..n_samples {
        let column = counts.sample_dense(s);
        let mut ratios: Vec<f64> = column
            .iter()
            .zip(&log_geo_means)
            .filter(|(&c, g)| c > 0 && g.is_finite())
            .map(|(&c, g)| (c as f64).ln() - g)
            .collect();
        if ratios.is_empty() {
            return Err(AmpliconError::EstimationError(format!(
                "sample '{}' has no positive counts for size factor estimation",
                counts.sample_ids()[s]
            )));
        }
        log_factors.push(median(&mut ratios));
    }

    let mean_log = log_factors.iter().sum::<f64>() / n_samples as f64;
    let factors = log_factors.iter().map(|l| (l - mean_log).exp()).collect();

    Ok(SizeFactors {
        sample_ids: counts.sample_ids().to_vec(),
        factors,
    })
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}
