//! Benjamini-Hochberg false discovery rate correction.

use serde::{Deserialize, Serialize};

/// Result of BH correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhCorrected {
    /// Original p-values.
    pub p_values: Vec<f64>,
    /// Adjusted p-values (q-values), same order.
    pub q_values: Vec<f64>,
}

impl BhCorrected {
    /// Number of tests.
    pub fn n_tests(&self) -> usize {
        self.p_values.len()
    }

    /// Count significant results at a threshold.
    pub fn n_significant(&self, alpha: f64) -> usize {
        self.q_values.iter().filter(|&&q| q < alpha).count()
    }
}

/// Apply Benjamini-Hochberg FDR correction.
///
/// For p-values sorted ascending, `q[i] = min(p[i] * n / rank[i], q[i+1])`,
/// capped at 1.
pub fn correct_bh(p_values: &[f64]) -> BhCorrected {
    let n = p_values.len();
    if n == 0 {
        return BhCorrected {
            p_values: vec![],
            q_values: vec![],
        };
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| {
        p_values[a]
            .partial_cmp(&p_values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut q_sorted = vec![0.0; n];
    let n_f64 = n as f64;

    // Start from largest p-value
    q_sorted[n - 1] = p_values[indices[n - 1]].min(1.0);
    for i in (0..n - 1).rev() {
        let rank = i + 1;
        let adjusted = p_values[indices[i]] * n_f64 / rank as f64;
        q_sorted[i] = adjusted.min(q_sorted[i + 1]).min(1.0);
    }

    let mut q_values = vec![0.0; n];
    for (i, &orig_idx) in indices.iter().enumerate() {
        q_values[orig_idx] = q_sorted[i];
    }

    BhCorrected {
        p_values: p_values.to_vec(),
        q_values,
    }
}
