//! Shared builders for test-battery unit tests.

use crate::data::Metadata;
use crate::diversity::DistanceMatrix;

pub(crate) fn sample_ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("S{}", i)).collect()
}

/// Metadata over `S1..Sn` with the given columns; `""` is missing.
pub(crate) fn metadata(columns: &[&str], rows: &[&[&str]]) -> Metadata {
    let records = rows
        .iter()
        .enumerate()
        .map(|(i, r)| {
            (
                format!("S{}", i + 1),
                r.iter().map(|v| v.to_string()).collect(),
            )
        })
        .collect();
    Metadata::from_records(columns.iter().map(|c| c.to_string()).collect(), records).unwrap()
}

/// Euclidean distances between points on a line.
pub(crate) fn line_distances(x: &[f64]) -> DistanceMatrix {
    DistanceMatrix::from_fn(sample_ids(x.len()), |i, j| (x[i] - x[j]).abs())
}
