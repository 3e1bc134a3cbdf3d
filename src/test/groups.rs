//! Sample grouping by one factor.

use crate::data::{Factor, Metadata};
use crate::error::{AmpliconError, Result};
use serde::{Deserialize, Serialize};

/// Level assignment of a set of samples. Levels are sorted alphabetically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grouping {
    levels: Vec<String>,
    codes: Vec<usize>,
}

impl Grouping {
    /// Group by arbitrary labels.
    pub fn new<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut levels: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        levels.sort();
        levels.dedup();
        let codes = labels
            .iter()
            .map(|l| levels.iter().position(|v| v == l.as_ref()).unwrap_or(0))
            .collect();
        Self { levels, codes }
    }

    /// Group the samples of `metadata` by `factor`.
    ///
    /// Returns the grouping together with the indices (into `metadata`) of the
    /// samples that have a value; samples missing the factor are left out.
    pub fn from_metadata(metadata: &Metadata, factor: Factor) -> Result<(Self, Vec<usize>)> {
        let values = metadata.factor_values(factor)?;
        let (kept, labels): (Vec<usize>, Vec<String>) = values
            .into_iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i, v)))
            .unzip();
        Ok((Self::new(&labels), kept))
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// Level index of every sample.
    pub fn codes(&self) -> &[usize] {
        &self.codes
    }

    pub fn n_samples(&self) -> usize {
        self.codes.len()
    }

    /// Sample indices belonging to a level.
    pub fn members(&self, level: usize) -> Vec<usize> {
        self.codes
            .iter()
            .enumerate()
            .filter_map(|(i, &c)| (c == level).then_some(i))
            .collect()
    }

    /// Number of samples per level.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.levels.len()];
        for &c in &self.codes {
            sizes[c] += 1;
        }
        sizes
    }

    /// Same level set, with codes permuted by `perm` (sample `i` takes the
    /// label of sample `perm[i]`).
    pub fn permuted(&self, perm: &[usize]) -> Self {
        Self {
            levels: self.levels.clone(),
            codes: perm.iter().map(|&p| self.codes[p]).collect(),
        }
    }

    /// Fail with `InsufficientGroups` unless there are at least two
    /// non-empty levels.
    pub fn require_groups(&self, what: &str) -> Result<()> {
        if self.levels.len() < 2 {
            return Err(AmpliconError::InsufficientGroups(format!(
                "{} needs at least 2 groups, found {}",
                what,
                self.levels.len()
            )));
        }
        Ok(())
    }

    /// All unordered level pairs `(a, b)` with `a < b`.
    pub fn level_pairs(&self) -> Vec<(usize, usize)> {
        let k = self.levels.len();
        (0..k)
            .flat_map(|a| (a + 1..k).map(move |b| (a, b)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_sorted() {
        let g = Grouping::new(&["b", "a", "b", "c"]);
        assert_eq!(g.levels(), &["a", "b", "c"]);
        assert_eq!(g.codes(), &[1, 0, 1, 2]);
        assert_eq!(g.sizes(), vec![1, 2, 1]);
        assert_eq!(g.members(1), vec![0, 2]);
        assert_eq!(g.level_pairs(), vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_single_group_rejected() {
        let g = Grouping::new(&["x", "x", "x"]);
        assert!(matches!(
            g.require_groups("test"),
            Err(AmpliconError::InsufficientGroups(_))
        ));
    }
}
