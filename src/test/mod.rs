//! Hypothesis tests: normality, PERMANOVA and its post-hoc, dispersion,
//! rank-based group comparisons and differential abundance.

pub mod groups;
pub mod normality;

pub(crate) mod rng;

#[cfg(test)]
pub(crate) mod fixtures;

pub use differential::{differential_abundance, DaConfig};
pub use dispersion::{betadisper, Dispersion, GroupDispersion};
pub use groups::Grouping;
pub use kruskal::{kruskal_wallis, KruskalWallis};
pub use normality::{shapiro_wilk, ShapiroWilk};
pub use permanova::{permanova, Permanova, PermanovaConfig, PermanovaRow};
pub use posthoc::{pairwise_permanova, PairwisePermanova, PairwisePermanovaRow};
pub use wald::{test_wald_nb, WaldResult, WaldResultSingle};
pub use wilcoxon::{pairwise_wilcoxon, wilcoxon_rank_sum, PairwiseRankSum, PairwiseRankSumRow, RankSum};
