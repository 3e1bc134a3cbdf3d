//! Shapiro-Wilk normality test (Royston 1995, algorithm AS R94).

use crate::error::{AmpliconError, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

const C1: [f64; 6] = [0.0, 0.221157, -0.147981, -2.071190, 4.434685, -2.706056];
const C2: [f64; 6] = [0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633];
const C3: [f64; 4] = [0.5440, -0.39978, 0.025054, -6.714e-4];
const C4: [f64; 4] = [1.3822, -0.77857, 0.062767, -0.0020322];
const C5: [f64; 4] = [-1.5861, -0.31082, -0.083751, 0.0038915];
const C6: [f64; 3] = [-0.4803, -0.082676, 0.0030302];
const G: [f64; 2] = [-2.273, 0.459];

const MIN_N: usize = 3;
const MAX_N: usize = 5000;

/// Shapiro-Wilk result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapiroWilk {
    pub n: usize,
    pub w: f64,
    pub p_value: f64,
}

impl ShapiroWilk {
    /// True when normality is not rejected at `alpha`.
    pub fn is_normal(&self, alpha: f64) -> bool {
        self.p_value >= alpha
    }
}

/// Test `values` for normality.
///
/// Fails with `NotComputable` when `n < 3`, `n > 5000` or all values are
/// equal; those cases have no p-value.
pub fn shapiro_wilk(values: &[f64]) -> Result<ShapiroWilk> {
    let n = values.len();
    if !(MIN_N..=MAX_N).contains(&n) {
        return Err(AmpliconError::NotComputable(format!(
            "Shapiro-Wilk needs 3..=5000 observations, have {}",
            n
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(AmpliconError::Numerical(
            "non-finite value in normality test".to_string(),
        ));
    }

    let mut x = values.to_vec();
    x.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let range = x[n - 1] - x[0];
    if range < 1e-19 {
        return Err(AmpliconError::NotComputable(
            "Shapiro-Wilk undefined for constant data".to_string(),
        ));
    }

    let a = coefficients(n)?;

    let scaled: Vec<f64> = x.iter().map(|v| v / range).collect();
    let mean = scaled.iter().sum::<f64>() / n as f64;
    let ssq: f64 = scaled.iter().map(|v| (v - mean).powi(2)).sum();
    let num: f64 = a
        .iter()
        .enumerate()
        .map(|(i, ai)| ai * (scaled[n - 1 - i] - scaled[i]))
        .sum();
    let w = (num * num / ssq).min(1.0);

    Ok(ShapiroWilk {
        n,
        w,
        p_value: p_value(w, n)?,
    })
}

/// Half-vector of weights `a_1 ≥ a_2 ≥ ...` for the upper order statistics.
fn coefficients(n: usize) -> Result<Vec<f64>> {
    let half = n / 2;
    if n == 3 {
        return Ok(vec![std::f64::consts::FRAC_1_SQRT_2]);
    }

    let std_normal = standard_normal()?;
    let an = n as f64;
    let m: Vec<f64> = (1..=half)
        .map(|i| std_normal.inverse_cdf((i as f64 - 0.375) / (an + 0.25)))
        .collect();
    let summ2 = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
    let ssumm2 = summ2.sqrt();
    let rsn = 1.0 / an.sqrt();

    let mut a = vec![0.0; half];
    let a1 = poly(&C1, rsn) - m[0] / ssumm2;
    let (first, fac) = if n > 5 {
        let a2 = -m[1] / ssumm2 + poly(&C2, rsn);
        a[1] = a2;
        let fac = ((summ2 - 2.0 * m[0] * m[0] - 2.0 * m[1] * m[1])
            / (1.0 - 2.0 * a1 * a1 - 2.0 * a2 * a2))
            .sqrt();
        (2, fac)
    } else {
        let fac = ((summ2 - 2.0 * m[0] * m[0]) / (1.0 - 2.0 * a1 * a1)).sqrt();
        (1, fac)
    };
    a[0] = a1;
    for i in first..half {
        a[i] = -m[i] / fac;
    }
    Ok(a)
}

fn p_value(w: f64, n: usize) -> Result<f64> {
    if n == 3 {
        const PI6: f64 = 6.0 / std::f64::consts::PI;
        const STQR: f64 = std::f64::consts::FRAC_PI_3;
        return Ok((PI6 * (w.sqrt().asin() - STQR)).clamp(0.0, 1.0));
    }

    let an = n as f64;
    let mut w1 = (1.0 - w).ln();
    let (m, s) = if n <= 11 {
        let gamma = poly(&G, an);
        if w1 >= gamma {
            return Ok(1e-99);
        }
        w1 = -(gamma - w1).ln();
        (poly(&C3, an), poly(&C4, an).exp())
    } else {
        let xx = an.ln();
        (poly(&C5, xx), poly(&C6, xx).exp())
    };

    let dist = Normal::new(m, s)
        .map_err(|e| AmpliconError::Numerical(format!("Shapiro-Wilk null: {}", e)))?;
    Ok(dist.sf(w1))
}

fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| AmpliconError::Numerical(e.to_string()))
}

/// `c[0] + c[1] x + c[2] x² + ...`
fn poly(c: &[f64], x: f64) -> f64 {
    c.iter().rev().fold(0.0, |acc, &ci| acc * x + ci)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_three_equally_spaced() {
        let sw = shapiro_wilk(&[1.0, 2.0, 3.0]).unwrap();
        assert_relative_eq!(sw.w, 1.0, epsilon = 1e-12);
        assert_relative_eq!(sw.p_value, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_reference_values() {
        // Royston's worked example
        let x = [148.0, 154.0, 158.0, 160.0, 161.0, 162.0, 166.0, 170.0, 182.0, 195.0, 236.0];
        let sw = shapiro_wilk(&x).unwrap();
        assert_relative_eq!(sw.w, 0.78881, epsilon = 1e-4);
        assert_relative_eq!(sw.p_value, 0.006704, epsilon = 1e-4);
    }

    #[test]
    fn test_normal_scores_not_rejected() {
        let std_normal = standard_normal().unwrap();
        let n = 30;
        let x: Vec<f64> = (1..=n)
            .map(|i| std_normal.inverse_cdf((i as f64 - 0.5) / n as f64))
            .collect();
        let sw = shapiro_wilk(&x).unwrap();
        assert!(sw.w > 0.97, "w = {}", sw.w);
        assert!(sw.is_normal(0.05));
    }

    #[test]
    fn test_skewed_rejected() {
        let x: Vec<f64> = (0..15).map(|i| (i as f64).exp()).collect();
        let sw = shapiro_wilk(&x).unwrap();
        assert!(sw.w < 0.8);
        assert!(sw.p_value < 0.01);
    }

    #[test]
    fn test_small_sample_skewed() {
        let sw = shapiro_wilk(&[1.0, 1.1, 1.2, 1.3, 10.0]).unwrap();
        assert!(sw.p_value < 0.05);
        assert!(sw.p_value > 0.0);
    }

    #[test]
    fn test_not_computable() {
        assert!(shapiro_wilk(&[1.0, 2.0]).unwrap_err().is_not_computable());
        assert!(shapiro_wilk(&[4.0; 6]).unwrap_err().is_not_computable());
    }
}
