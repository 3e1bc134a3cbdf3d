//! Library-size normalization.

pub mod size_factors;

pub use size_factors::{size_factors, SizeFactors};
