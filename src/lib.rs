//! Amplicon community statistics library
//!
//! Composable primitives for the statistical side of amplicon (16S) microbiome
//! studies: abundance tables, prevalence filtering, diversity, ordination and a
//! battery of hypothesis tests over study factors.
//!
//! # Overview
//!
//! - **data**: Core data structures (CountMatrix, Taxonomy, PhyloTree, Metadata, AbundanceTable, designs)
//! - **filter**: Prevalence filtering with a per-phylum rule
//! - **diversity**: Alpha indices, beta dissimilarities, PCoA
//! - **normalize**: Size factors for count models
//! - **model**: Negative binomial GLM
//! - **test**: Shapiro-Wilk, PERMANOVA, betadisper, Kruskal-Wallis, Wilcoxon, differential abundance
//! - **correct**: Multiple testing correction (Bonferroni, Benjamini-Hochberg)
//! - **pipeline**: Battery configuration and execution
//! - **report**: Normalized result table, queries and export
//!
//! # Example
//!
//! ```no_run
//! use amplicon_stats::prelude::*;
//!
//! let counts = CountMatrix::from_tsv("counts.tsv").unwrap();
//! let taxonomy = Taxonomy::from_tsv("taxonomy.tsv").unwrap();
//! let metadata = Metadata::from_tsv("metadata.tsv").unwrap();
//! let table = AbundanceTable::new(counts, taxonomy, None, metadata).unwrap();
//!
//! let report = run_battery(&table, &BatteryConfig::example()).unwrap();
//! let summary = SummaryTable::from_report(&report);
//! for row in summary
//!     .query()
//!     .test("permanova")
//!     .min_effect(0.2)
//!     .sort_by(Column::EffectSize, Order::Descending)
//!     .rows()
//! {
//!     println!("{} {:?}", row.factors, row.effect_size);
//! }
//! ```

pub mod correct;
pub mod data;
pub mod diversity;
pub mod error;
pub mod filter;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::correct::{correct_bh, correct_bonferroni, Correction};
    pub use crate::data::{
        AbundanceTable, Contrast, CountMatrix, DaResult, DaResultSet, DaStatus, Depth,
        DepthGroup, Design, DesignMatrix, Factor, Interaction, Metadata, Orientation, PhyloTree,
        Rank, Season, Taxonomy, Term, Variable, Zone,
    };
    pub use crate::diversity::{AlphaMetric, AlphaTable, DistanceMatrix, DistanceMetric, Pcoa};
    pub use crate::error::{AmpliconError, Result};
    pub use crate::filter::{filter_prevalence, FilterOutcome, PrevalenceFilter, PrevalenceTable};
    pub use crate::model::{model_nb, NbFit};
    pub use crate::normalize::{size_factors, SizeFactors};
    pub use crate::pipeline::{
        run_battery, BatteryConfig, BatteryReport, TestOutcome, TestRun, TestSpec, TestState,
    };
    pub use crate::report::{Column, Order, RowStatus, SummaryRow, SummaryTable};
    pub use crate::test::{
        betadisper, differential_abundance, kruskal_wallis, pairwise_permanova,
        pairwise_wilcoxon, permanova, shapiro_wilk, wilcoxon_rank_sum, DaConfig, Grouping,
        PermanovaConfig,
    };
}
