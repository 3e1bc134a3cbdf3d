//! Design matrix construction from metadata and a typed design.

use crate::data::covariates::Factor;
use crate::data::formula::{Design, Term};
use crate::data::metadata::Metadata;
use crate::error::{AmpliconError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// A treatment-coded design matrix (samples × coefficients).
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    matrix: DMatrix<f64>,
    coefficient_names: Vec<String>,
    sample_ids: Vec<String>,
    reference_levels: HashMap<Factor, String>,
    /// Term index of each column; `None` for the intercept.
    column_terms: Vec<Option<usize>>,
    terms: Vec<Term>,
}

impl DesignMatrix {
    /// Create a design matrix directly from components.
    pub fn from_matrix(
        matrix: DMatrix<f64>,
        coefficient_names: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Self {
        let column_terms = vec![None; matrix.ncols()];
        Self {
            matrix,
            coefficient_names,
            sample_ids,
            reference_levels: HashMap::new(),
            column_terms,
            terms: Vec::new(),
        }
    }

    /// Build an intercept + treatment-coded design.
    ///
    /// Levels are the values observed in `metadata`, sorted alphabetically; the
    /// first is the reference unless `references` names another. Interaction
    /// columns are products of the member factors' dummy columns. Every sample
    /// must have a value for every factor.
    pub fn from_design(
        metadata: &Metadata,
        design: &Design,
        references: &HashMap<Factor, String>,
    ) -> Result<Self> {
        let sample_ids = metadata.sample_ids().to_vec();
        let n_samples = sample_ids.len();

        let mut dummies: HashMap<Factor, Vec<(String, Vec<f64>)>> = HashMap::new();
        let mut reference_levels = HashMap::new();

        for &factor in &design.factors {
            let column: Vec<String> = metadata
                .factor_values(factor)?
                .into_iter()
                .enumerate()
                .map(|(i, v)| {
                    v.ok_or_else(|| {
                        AmpliconError::InvalidParameter(format!(
                            "sample '{}' has no value for '{}'",
                            sample_ids[i], factor
                        ))
                    })
                })
                .collect::<Result<_>>()?;

            let mut levels: Vec<String> = column.clone();
            levels.sort();
            levels.dedup();

            let reference = match references.get(&factor) {
                Some(r) if levels.contains(r) => r.clone(),
                Some(r) => {
                    return Err(AmpliconError::InvalidParameter(format!(
                        "Level '{}' not found for factor '{}'",
                        r, factor
                    )))
                }
                None => levels.first().cloned().ok_or_else(|| {
                    AmpliconError::EmptyData(format!("no levels for '{}'", factor))
                })?,
            };

            let cols = levels
                .iter()
                .filter(|l| **l != reference)
                .map(|level| {
                    let col = column
                        .iter()
                        .map(|v| if v == level { 1.0 } else { 0.0 })
                        .collect();
                    (format!("{}{}", factor.column(), level), col)
                })
                .collect();
            dummies.insert(factor, cols);
            reference_levels.insert(factor, reference);
        }

        let terms = design.terms();
        let mut coefficient_names = vec!["(Intercept)".to_string()];
        let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n_samples]];
        let mut column_terms = vec![None];

        for (term_idx, term) in terms.iter().enumerate() {
            // Cartesian product of the member factors' dummy columns.
            let mut acc: Vec<(String, Vec<f64>)> = vec![(String::new(), vec![1.0; n_samples])];
            for factor in term.factors() {
                let mut next = Vec::new();
                for (name, col) in &acc {
                    for (dname, dcol) in &dummies[factor] {
                        let joined = if name.is_empty() {
                            dname.clone()
                        } else {
                            format!("{}:{}", name, dname)
                        };
                        let prod = col.iter().zip(dcol).map(|(a, b)| a * b).collect();
                        next.push((joined, prod));
                    }
                }
                acc = next;
            }
            for (name, col) in acc {
                coefficient_names.push(name);
                columns.push(col);
                column_terms.push(Some(term_idx));
            }
        }

        let matrix = DMatrix::from_fn(n_samples, columns.len(), |r, c| columns[c][r]);

        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids,
            reference_levels,
            column_terms,
            terms,
        })
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Get sample IDs.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Number of samples (rows).
    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Terms in model order.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Reference level of a factor.
    pub fn reference_level(&self, factor: Factor) -> Option<&str> {
        self.reference_levels.get(&factor).map(|s| s.as_str())
    }

    /// Get the index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Check if the matrix has an intercept.
    pub fn has_intercept(&self) -> bool {
        self.coefficient_names.first().map(|s| s.as_str()) == Some("(Intercept)")
    }

    /// Columns belonging to terms `0..=term_idx` plus the intercept.
    pub fn columns_through(&self, term_idx: usize) -> Vec<usize> {
        self.column_terms
            .iter()
            .enumerate()
            .filter(|(_, t)| t.map_or(true, |t| t <= term_idx))
            .map(|(i, _)| i)
            .collect()
    }

    /// Sub-matrix of the given columns.
    pub fn select_columns(&self, cols: &[usize]) -> DMatrix<f64> {
        self.matrix.select_columns(cols)
    }
}
