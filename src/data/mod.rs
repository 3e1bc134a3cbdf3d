//! Data structures: counts, taxonomy, tree, sample covariates and designs.

mod count_matrix;
mod covariates;
mod design_matrix;
mod formula;
mod metadata;
mod result;
mod table;
mod taxonomy;
mod tree;

pub use count_matrix::{CountMatrix, Orientation};
pub use covariates::{Depth, DepthGroup, Factor, Season, Zone};
pub use design_matrix::DesignMatrix;
pub use formula::{Design, Interaction, Term};
pub use metadata::{Metadata, Variable};
pub use result::{is_significant, Contrast, DaResult, DaResultSet, DaStatus, ResultSummary};
pub(crate) use result::cmp_option;
pub use table::{AbundanceTable, PhylumSummary, SampleRef, TaxonRef};
pub use taxonomy::{Lineage, Rank, Taxonomy, UNKNOWN};
pub use tree::{Node, NodeId, PhyloTree};
