//! Sparse count storage for amplicon abundance data.

use crate::error::{AmpliconError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Layout of a count table on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    /// One row per taxon, one column per sample.
    #[default]
    TaxaAsRows,
    /// One row per sample, one column per taxon (sequence-table layout).
    SamplesAsRows,
}

/// A sparse count matrix storing taxon abundances across samples.
///
/// Stored taxa × samples in CSR form so per-taxon scans (prevalence,
/// per-taxon models) walk contiguous memory.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    data: CsMat<u64>,
    taxon_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new CountMatrix from a sparse matrix (taxa × samples) and identifiers.
    pub fn new(data: CsMat<u64>, taxon_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (nrows, ncols) = data.shape();
        if nrows != taxon_ids.len() {
            return Err(AmpliconError::DimensionMismatch(format!(
                "count matrix has {} taxon rows but {} taxon IDs",
                nrows,
                taxon_ids.len()
            )));
        }
        if ncols != sample_ids.len() {
            return Err(AmpliconError::DimensionMismatch(format!(
                "count matrix has {} sample columns but {} sample IDs",
                ncols,
                sample_ids.len()
            )));
        }
        check_unique(&taxon_ids, "taxon")?;
        check_unique(&sample_ids, "sample")?;
        Ok(Self {
            data,
            taxon_ids,
            sample_ids,
        })
    }

    /// Build from a dense row-major taxa × samples table.
    pub fn from_rows(rows: &[Vec<u64>], taxon_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let n_samples = sample_ids.len();
        let mut tri_mat = TriMat::new((rows.len(), n_samples));
        for (row, values) in rows.iter().enumerate() {
            if values.len() != n_samples {
                return Err(AmpliconError::DimensionMismatch(format!(
                    "row {} has {} values, expected {}",
                    row,
                    values.len(),
                    n_samples
                )));
            }
            for (col, &val) in values.iter().enumerate() {
                if val > 0 {
                    tri_mat.add_triplet(row, col, val);
                }
            }
        }
        Self::new(tri_mat.to_csr(), taxon_ids, sample_ids)
    }

    /// Load a count matrix from a TSV file with taxa as rows.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_tsv_with(path, Orientation::TaxaAsRows)
    }

    /// Load a count matrix from a TSV file in the given orientation.
    ///
    /// The first row is a header whose first cell is ignored; every following
    /// row starts with its identifier.
    pub fn from_tsv_with<P: AsRef<Path>>(path: P, orientation: Orientation) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| AmpliconError::EmptyData("Empty TSV file".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').collect();
        if header.len() < 2 {
            return Err(AmpliconError::EmptyData(
                "TSV must have at least one data column".to_string(),
            ));
        }
        let col_ids: Vec<String> = header[1..].iter().map(|s| s.trim().to_string()).collect();
        let n_cols = col_ids.len();

        let mut triplets: Vec<(usize, usize, u64)> = Vec::new();
        let mut row_ids: Vec<String> = Vec::new();

        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let row_idx = row_ids.len();
            if fields.len() - 1 != n_cols {
                return Err(AmpliconError::DimensionMismatch(format!(
                    "row '{}' has {} values, header has {}",
                    fields[0],
                    fields.len() - 1,
                    n_cols
                )));
            }
            row_ids.push(fields[0].trim().to_string());

            for (col_idx, value_str) in fields[1..].iter().enumerate() {
                let value: u64 = value_str.trim().parse().map_err(|_| AmpliconError::InvalidCount {
                    value: value_str.to_string(),
                    row: row_idx,
                    col: col_idx,
                })?;
                if value > 0 {
                    triplets.push((row_idx, col_idx, value));
                }
            }
        }

        if row_ids.is_empty() {
            return Err(AmpliconError::EmptyData("No data rows in TSV".to_string()));
        }

        let n_rows = row_ids.len();
        let (shape, taxon_ids, sample_ids) = match orientation {
            Orientation::TaxaAsRows => ((n_rows, n_cols), row_ids, col_ids),
            Orientation::SamplesAsRows => ((n_cols, n_rows), col_ids, row_ids),
        };

        let mut tri_mat = TriMat::new(shape);
        for (row, col, val) in triplets {
            match orientation {
                Orientation::TaxaAsRows => tri_mat.add_triplet(row, col, val),
                Orientation::SamplesAsRows => tri_mat.add_triplet(col, row, val),
            }
        }

        Self::new(tri_mat.to_csr(), taxon_ids, sample_ids)
    }

    /// Write the count matrix to a TSV file (taxa as rows).
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write!(writer, "taxon_id")?;
        for sample_id in &self.sample_ids {
            write!(writer, "\t{}", sample_id)?;
        }
        writeln!(writer)?;

        for (row_idx, taxon_id) in self.taxon_ids.iter().enumerate() {
            write!(writer, "{}", taxon_id)?;
            for value in self.taxon_dense(row_idx) {
                write!(writer, "\t{}", value)?;
            }
            writeln!(writer)?;
        }

        Ok(())
    }

    /// Get the value at (taxon, sample), returning 0 for missing entries.
    #[inline]
    pub fn get(&self, taxon: usize, sample: usize) -> u64 {
        self.data.get(taxon, sample).copied().unwrap_or(0)
    }

    /// Number of taxa (rows).
    #[inline]
    pub fn n_taxa(&self) -> usize {
        self.data.rows()
    }

    /// Number of samples (columns).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.cols()
    }

    /// Total number of non-zero entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.data.nnz()
    }

    /// Taxon identifiers.
    #[inline]
    pub fn taxon_ids(&self) -> &[String] {
        &self.taxon_ids
    }

    /// Sample identifiers.
    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Get the underlying sparse matrix.
    #[inline]
    pub fn data(&self) -> &CsMat<u64> {
        &self.data
    }

    /// Number of samples in which a taxon has a non-zero count.
    pub fn prevalence_count(&self, taxon: usize) -> usize {
        self.data.outer_view(taxon).map(|v| v.nnz()).unwrap_or(0)
    }

    /// Dense counts of one taxon across samples.
    pub fn taxon_dense(&self, taxon: usize) -> Vec<u64> {
        let mut dense = vec![0u64; self.n_samples()];
        if let Some(row_vec) = self.data.outer_view(taxon) {
            for (col, &val) in row_vec.iter() {
                dense[col] = val;
            }
        }
        dense
    }

    /// Dense counts of one sample across taxa.
    pub fn sample_dense(&self, sample: usize) -> Vec<u64> {
        (0..self.n_taxa()).map(|row| self.get(row, sample)).collect()
    }

    /// Dense sample profiles, one vector per sample.
    pub fn sample_profiles(&self) -> Vec<Vec<u64>> {
        let mut profiles = vec![vec![0u64; self.n_taxa()]; self.n_samples()];
        for (row, row_vec) in self.data.outer_iterator().enumerate() {
            for (col, &val) in row_vec.iter() {
                profiles[col][row] = val;
            }
        }
        profiles
    }

    /// Total counts per taxon.
    pub fn taxon_sums(&self) -> Vec<u64> {
        (0..self.n_taxa())
            .into_par_iter()
            .map(|row| {
                self.data
                    .outer_view(row)
                    .map(|v| v.iter().map(|(_, &val)| val).sum())
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Library sizes (total counts per sample).
    pub fn sample_sums(&self) -> Vec<u64> {
        let mut sums = vec![0u64; self.n_samples()];
        for row_vec in self.data.outer_iterator() {
            for (col, &val) in row_vec.iter() {
                sums[col] += val;
            }
        }
        sums
    }

    /// Subset the matrix to the given taxa (by index, in the given order).
    pub fn subset_taxa(&self, indices: &[usize]) -> Result<Self> {
        let n_samples = self.n_samples();
        let mut tri_mat = TriMat::new((indices.len(), n_samples));
        let mut new_taxon_ids = Vec::with_capacity(indices.len());

        for (new_row, &old_row) in indices.iter().enumerate() {
            if old_row >= self.n_taxa() {
                return Err(AmpliconError::InvalidParameter(format!(
                    "Taxon index {} out of bounds",
                    old_row
                )));
            }
            new_taxon_ids.push(self.taxon_ids[old_row].clone());

            if let Some(row_vec) = self.data.outer_view(old_row) {
                for (col, &val) in row_vec.iter() {
                    tri_mat.add_triplet(new_row, col, val);
                }
            }
        }

        Self::new(tri_mat.to_csr(), new_taxon_ids, self.sample_ids.clone())
    }

    /// Subset the matrix to the given samples (by index, in the given order).
    pub fn subset_samples(&self, indices: &[usize]) -> Result<Self> {
        let col_map: HashMap<usize, usize> = indices
            .iter()
            .enumerate()
            .map(|(new_idx, &old_idx)| (old_idx, new_idx))
            .collect();

        let mut new_sample_ids = Vec::with_capacity(indices.len());
        for &old_col in indices {
            if old_col >= self.n_samples() {
                return Err(AmpliconError::InvalidParameter(format!(
                    "Sample index {} out of bounds",
                    old_col
                )));
            }
            new_sample_ids.push(self.sample_ids[old_col].clone());
        }

        let mut tri_mat = TriMat::new((self.n_taxa(), indices.len()));
        for (row, row_vec) in self.data.outer_iterator().enumerate() {
            for (old_col, &val) in row_vec.iter() {
                if let Some(&new_col) = col_map.get(&old_col) {
                    tri_mat.add_triplet(row, new_col, val);
                }
            }
        }

        Self::new(tri_mat.to_csr(), self.taxon_ids.clone(), new_sample_ids)
    }

    /// Convert to a dense taxa × samples matrix (f64).
    pub fn to_dense(&self) -> nalgebra::DMatrix<f64> {
        let mut dense = nalgebra::DMatrix::zeros(self.n_taxa(), self.n_samples());
        for (row, row_vec) in self.data.outer_iterator().enumerate() {
            for (col, &val) in row_vec.iter() {
                dense[(row, col)] = val as f64;
            }
        }
        dense
    }
}

fn check_unique(ids: &[String], what: &str) -> Result<()> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(AmpliconError::DimensionMismatch(format!(
                "duplicate {} ID '{}'",
                what, id
            )));
        }
    }
    Ok(())
}
