//! Diversity metrics: alpha indices, beta dissimilarities and ordination.

pub mod alpha;
pub mod beta;
pub mod ordination;

pub use alpha::{AlphaMetric, AlphaTable};
pub use beta::{DistanceMatrix, DistanceMetric};
pub use ordination::Pcoa;
