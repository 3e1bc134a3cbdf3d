//! Between-sample (beta) dissimilarities.

use crate::data::AbundanceTable;
use crate::error::{AmpliconError, Result};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A pairwise dissimilarity over sample profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `Σ|x_i - y_i| / Σ(x_i + y_i)` on raw counts.
    #[default]
    BrayCurtis,
    /// Bray-Curtis on per-sample proportions.
    BrayCurtisRelative,
    /// `1 - |A ∩ B| / |A ∪ B|` on presence/absence.
    Jaccard,
    /// Euclidean distance on raw counts.
    Euclidean,
}

impl DistanceMetric {
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::BrayCurtis => "bray_curtis",
            DistanceMetric::BrayCurtisRelative => "bray_curtis_relative",
            DistanceMetric::Jaccard => "jaccard",
            DistanceMetric::Euclidean => "euclidean",
        }
    }

    /// Dissimilarity between two profiles of equal length.
    pub fn between(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            DistanceMetric::BrayCurtis | DistanceMetric::BrayCurtisRelative => bray_curtis(a, b),
            DistanceMetric::Jaccard => jaccard(a, b),
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt(),
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = AmpliconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "bray_curtis" | "bray" => Ok(DistanceMetric::BrayCurtis),
            "bray_curtis_relative" => Ok(DistanceMetric::BrayCurtisRelative),
            "jaccard" => Ok(DistanceMetric::Jaccard),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            _ => Err(AmpliconError::InvalidParameter(format!(
                "unknown distance metric '{}'",
                s
            ))),
        }
    }
}

/// Bray-Curtis dissimilarity. Two empty profiles are identical (0).
pub fn bray_curtis(a: &[f64], b: &[f64]) -> f64 {
    let (num, den) = a
        .iter()
        .zip(b)
        .fold((0.0, 0.0), |(num, den), (x, y)| (num + (x - y).abs(), den + x + y));
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Jaccard dissimilarity on presence/absence. Two empty profiles are identical (0).
pub fn jaccard(a: &[f64], b: &[f64]) -> f64 {
    let mut intersection = 0usize;
    let mut union = 0usize;
    for (&x, &y) in a.iter().zip(b) {
        let (pa, pb) = (x > 0.0, y > 0.0);
        if pa || pb {
            union += 1;
        }
        if pa && pb {
            intersection += 1;
        }
    }
    if union == 0 {
        0.0
    } else {
        1.0 - intersection as f64 / union as f64
    }
}

/// Symmetric, zero-diagonal dissimilarity matrix over labelled samples.
///
/// Only the strict upper triangle is stored, so `d(i, j) == d(j, i)` and
/// `d(i, i) == 0` hold for every matrix that can be constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceMatrix {
    ids: Vec<String>,
    condensed: Vec<f64>,
}

impl DistanceMatrix {
    /// Build by evaluating `f(i, j)` for every `i < j`.
    pub fn from_fn<F>(ids: Vec<String>, f: F) -> Self
    where
        F: Fn(usize, usize) -> f64 + Sync,
    {
        let n = ids.len();
        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .collect();
        let condensed = pairs.par_iter().map(|&(i, j)| f(i, j)).collect();
        Self { ids, condensed }
    }

    /// Build from a full square matrix, reading the upper triangle. Fails if
    /// the matrix is not square or not symmetric.
    pub fn from_dense(ids: Vec<String>, dense: &DMatrix<f64>) -> Result<Self> {
        let n = ids.len();
        if dense.nrows() != n || dense.ncols() != n {
            return Err(AmpliconError::DimensionMismatch(format!(
                "{} labels for a {}×{} distance matrix",
                n,
                dense.nrows(),
                dense.ncols()
            )));
        }
        for i in 0..n {
            for j in (i + 1)..n {
                if (dense[(i, j)] - dense[(j, i)]).abs() > 1e-12 {
                    return Err(AmpliconError::InvalidParameter(format!(
                        "distance matrix is not symmetric at ({}, {})",
                        i, j
                    )));
                }
            }
        }
        Ok(Self::from_fn(ids, |i, j| dense[(i, j)]))
    }

    /// Pairwise dissimilarities between the samples of a table.
    pub fn compute(table: &AbundanceTable, metric: DistanceMetric) -> Result<Self> {
        if table.n_samples() < 2 {
            return Err(AmpliconError::EstimationError(format!(
                "beta diversity needs at least 2 samples, have {}",
                table.n_samples()
            )));
        }
        let profiles: Vec<Vec<f64>> = match metric {
            DistanceMetric::BrayCurtisRelative => {
                let rel = table.to_relative();
                (0..rel.nrows())
                    .map(|i| rel.row(i).iter().copied().collect())
                    .collect()
            }
            _ => table
                .counts()
                .sample_profiles()
                .into_iter()
                .map(|p| p.into_iter().map(|c| c as f64).collect())
                .collect(),
        };
        Ok(Self::from_fn(table.sample_ids().to_vec(), |i, j| {
            metric.between(&profiles[i], &profiles[j])
        }))
    }

    fn index(&self, i: usize, j: usize) -> usize {
        let n = self.ids.len();
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        n * i - i * (i + 1) / 2 + (j - i - 1)
    }

    /// Dissimilarity between samples `i` and `j`.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i == j {
            0.0
        } else {
            self.condensed[self.index(i, j)]
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Sample labels in matrix order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Upper-triangle values, row by row.
    pub fn condensed(&self) -> &[f64] {
        &self.condensed
    }

    /// Restrict to the given sample indices, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let ids = indices.iter().map(|&i| self.ids[i].clone()).collect();
        Self::from_fn(ids, |a, b| self.get(indices[a], indices[b]))
    }

    /// Restrict to the named samples, in the given order.
    pub fn subset(&self, ids: &[String]) -> Result<Self> {
        let pos: HashMap<&str, usize> = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        let indices = ids
            .iter()
            .map(|id| {
                pos.get(id.as_str()).copied().ok_or_else(|| {
                    AmpliconError::SampleMismatch(format!("sample '{}' not in distance matrix", id))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.select(&indices))
    }

    /// Full square matrix.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let n = self.len();
        DMatrix::from_fn(n, n, |i, j| self.get(i, j))
    }

    /// Write as a square TSV with sample labels.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write!(writer, "sample_id")?;
        for id in &self.ids {
            write!(writer, "\t{}", id)?;
        }
        writeln!(writer)?;
        for (i, id) in self.ids.iter().enumerate() {
            write!(writer, "{}", id)?;
            for j in 0..self.len() {
                write!(writer, "\t{:.6}", self.get(i, j))?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}
