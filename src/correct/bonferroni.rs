//! Bonferroni family-wise error correction.

/// Multiply each p-value by the number of comparisons, capped at 1.
pub fn correct_bonferroni(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len() as f64;
    p_values.iter().map(|p| (p * m).min(1.0)).collect()
}
