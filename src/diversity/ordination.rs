//! Principal Coordinates Analysis.
//!
//! 1. Gower-centre the matrix `A = -½ D²`: `G = (I - J/n) A (I - J/n)`
//! 2. Symmetric eigen-decomposition of `G`, eigenvalues sorted descending
//! 3. Coordinates on axis `k` are `v_k √λ_k` for `λ_k > 0`
//!
//! Percent explained per axis is `100 λ_k / Σ|λ|`, so non-Euclidean
//! dissimilarities (negative eigenvalues) are accounted for.
//!
//! Eigenvector signs are arbitrary. Each axis is flipped so that its
//! largest-magnitude loading is positive; this is reproducible here but
//! orientations may differ from other software.

use crate::diversity::beta::DistanceMatrix;
use crate::error::{AmpliconError, Result};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::warn;

/// Eigenvalues below this magnitude are treated as zero.
pub(crate) const EIGEN_TOL: f64 = 1e-10;

/// PCoA result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pcoa {
    pub sample_ids: Vec<String>,
    /// All eigenvalues, descending.
    pub eigenvalues: Vec<f64>,
    /// `100 λ / Σ|λ|` for every eigenvalue.
    pub percent_explained: Vec<f64>,
    /// `coordinates[sample][axis]`.
    pub coordinates: Vec<Vec<f64>>,
}

impl Pcoa {
    /// Ordinate a distance matrix onto `axes` dimensions. Fewer axes are
    /// returned if there are fewer positive eigenvalues.
    pub fn compute(dm: &DistanceMatrix, axes: usize) -> Result<Self> {
        if axes == 0 {
            return Err(AmpliconError::InvalidParameter(
                "ordination needs at least one axis".to_string(),
            ));
        }
        if dm.len() < 2 {
            return Err(AmpliconError::EstimationError(
                "ordination needs at least 2 samples".to_string(),
            ));
        }

        let (eigenvalues, vectors) = sorted_eigen(&gower_centered(dm));
        let abs_total: f64 = eigenvalues.iter().map(|l| l.abs()).sum();
        let percent_explained = eigenvalues
            .iter()
            .map(|l| if abs_total > 0.0 { 100.0 * l / abs_total } else { 0.0 })
            .collect();

        let n_positive = eigenvalues.iter().filter(|&&l| l > EIGEN_TOL).count();
        let k = axes.min(n_positive);
        if k < axes {
            warn!(requested = axes, available = k, "fewer positive eigenvalues than axes");
        }

        let n = dm.len();
        let mut coordinates = vec![vec![0.0; k]; n];
        for axis in 0..k {
            let scale = eigenvalues[axis].sqrt();
            let v = oriented(vectors.column(axis).into_owned());
            for (i, row) in coordinates.iter_mut().enumerate() {
                row[axis] = v[i] * scale;
            }
        }

        Ok(Self {
            sample_ids: dm.ids().to_vec(),
            eigenvalues,
            percent_explained,
            coordinates,
        })
    }

    /// Number of coordinate axes.
    pub fn n_axes(&self) -> usize {
        self.coordinates.first().map_or(0, |r| r.len())
    }

    /// Write coordinates as TSV with `Axis.1`, `Axis.2`, ... columns.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write!(writer, "sample_id")?;
        for k in 0..self.n_axes() {
            write!(writer, "\tAxis.{} ({:.1}%)", k + 1, self.percent_explained[k])?;
        }
        writeln!(writer)?;
        for (id, row) in self.sample_ids.iter().zip(&self.coordinates) {
            write!(writer, "{}", id)?;
            for v in row {
                write!(writer, "\t{:.6}", v)?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}

/// `G = (I - J/n)(-½ D²)(I - J/n)`.
pub(crate) fn gower_centered(dm: &DistanceMatrix) -> DMatrix<f64> {
    let n = dm.len();
    let mut a = DMatrix::from_fn(n, n, |i, j| {
        let d = dm.get(i, j);
        -0.5 * d * d
    });
    let row_means: Vec<f64> = (0..n).map(|i| a.row(i).mean()).collect();
    let grand = row_means.iter().sum::<f64>() / n as f64;
    // A is symmetric, so column means equal row means.
    for i in 0..n {
        for j in 0..n {
            a[(i, j)] += grand - row_means[i] - row_means[j];
        }
    }
    a
}

/// Eigenpairs of a symmetric matrix, eigenvalues descending.
pub(crate) fn sorted_eigen(g: &DMatrix<f64>) -> (Vec<f64>, DMatrix<f64>) {
    let eig = SymmetricEigen::new(g.clone());
    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| {
        eig.eigenvalues[b]
            .partial_cmp(&eig.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let values = order.iter().map(|&i| eig.eigenvalues[i]).collect();
    let vectors = eig.eigenvectors.select_columns(&order);
    (values, vectors)
}

/// Flip so the largest-magnitude entry is positive.
fn oriented(mut v: DVector<f64>) -> DVector<f64> {
    let pivot = v.iamax();
    if v[pivot] < 0.0 {
        v.neg_mut();
    }
    v
}
