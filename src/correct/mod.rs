//! Multiple testing correction.

pub mod bh;
pub mod bonferroni;

pub use bh::{correct_bh, BhCorrected};
pub use bonferroni::correct_bonferroni;

use serde::{Deserialize, Serialize};

/// Correction applied across a family of p-values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    #[default]
    Bonferroni,
    BenjaminiHochberg,
    None,
}

impl Correction {
    pub fn name(&self) -> &'static str {
        match self {
            Correction::Bonferroni => "bonferroni",
            Correction::BenjaminiHochberg => "BH",
            Correction::None => "none",
        }
    }

    /// Adjust the present p-values; absent (or NaN) entries stay absent and
    /// are not counted as comparisons.
    pub fn adjust(&self, p_values: &[Option<f64>]) -> Vec<Option<f64>> {
        let present: Vec<(usize, f64)> = p_values
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.filter(|v| !v.is_nan()).map(|v| (i, v)))
            .collect();
        let raw: Vec<f64> = present.iter().map(|&(_, p)| p).collect();
        let adjusted = match self {
            Correction::Bonferroni => correct_bonferroni(&raw),
            Correction::BenjaminiHochberg => correct_bh(&raw).q_values,
            Correction::None => raw,
        };

        let mut out = vec![None; p_values.len()];
        for ((i, _), q) in present.into_iter().zip(adjusted) {
            out[i] = Some(q);
        }
        out
    }
}

impl std::fmt::Display for Correction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_values_not_counted() {
        let p = vec![Some(0.01), None, Some(0.02), Some(f64::NAN)];
        let adj = Correction::Bonferroni.adjust(&p);
        assert_eq!(adj[0], Some(0.02));
        assert_eq!(adj[1], None);
        assert_eq!(adj[2], Some(0.04));
        assert_eq!(adj[3], None);
    }

    #[test]
    fn test_none_is_identity() {
        let p = vec![Some(0.3), None];
        assert_eq!(Correction::None.adjust(&p), p);
    }
}
