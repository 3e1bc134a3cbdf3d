//! Count models.

pub mod nb;

pub use nb::{model_nb, NbFit, NbFitSingle};
