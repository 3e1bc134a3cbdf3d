//! The abundance table: counts joined with taxonomy, tree and sample metadata.
//!
//! An [`AbundanceTable`] is immutable. Every subset or filter returns a new
//! table whose four parts stay aligned on the same sample and taxon order.

use crate::data::count_matrix::CountMatrix;
use crate::data::metadata::{Metadata, Variable};
use crate::data::taxonomy::{Lineage, Rank, Taxonomy};
use crate::data::tree::PhyloTree;
use crate::error::{AmpliconError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// A sample as seen by a subsetting predicate.
#[derive(Debug, Clone, Copy)]
pub struct SampleRef<'a> {
    pub index: usize,
    pub id: &'a str,
    /// Library size.
    pub total: u64,
    metadata: &'a Metadata,
}

impl<'a> SampleRef<'a> {
    /// Metadata value of this sample.
    pub fn get(&self, column: &str) -> Option<&'a Variable> {
        self.metadata.get(self.id, column)
    }
}

/// A taxon as seen by a subsetting predicate.
#[derive(Debug, Clone, Copy)]
pub struct TaxonRef<'a> {
    pub index: usize,
    pub id: &'a str,
    pub lineage: &'a Lineage,
    /// Total count over all samples.
    pub total: u64,
    /// Number of samples with a non-zero count.
    pub prevalence: usize,
}

/// Taxa and reads per phylum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhylumSummary {
    pub phylum: String,
    pub n_taxa: usize,
    pub total_abundance: u64,
}

/// Counts, taxonomy, optional tree and metadata over one sample/taxon index.
#[derive(Debug, Clone)]
pub struct AbundanceTable {
    counts: CountMatrix,
    taxonomy: Taxonomy,
    tree: Option<PhyloTree>,
    metadata: Metadata,
}

impl AbundanceTable {
    /// Join the four inputs.
    ///
    /// Taxon IDs must be the same set in counts, taxonomy and tree tips;
    /// sample IDs must be the same set in counts and metadata. Taxonomy and
    /// metadata are re-ordered to follow the count matrix.
    pub fn new(
        counts: CountMatrix,
        taxonomy: Taxonomy,
        tree: Option<PhyloTree>,
        metadata: Metadata,
    ) -> Result<Self> {
        same_ids(counts.taxon_ids(), taxonomy.taxon_ids(), "taxon", "taxonomy")?;
        if let Some(tree) = &tree {
            same_ids(counts.taxon_ids(), &tree.tip_labels(), "taxon", "tree tips")?;
        }
        same_ids(counts.sample_ids(), metadata.sample_ids(), "sample", "metadata")?;
        metadata.validate_factors()?;

        let taxonomy = taxonomy.select(counts.taxon_ids())?;
        let metadata = metadata.align_to(counts.sample_ids())?;

        info!(
            n_samples = counts.n_samples(),
            n_taxa = counts.n_taxa(),
            has_tree = tree.is_some(),
            "built abundance table"
        );
        Ok(Self {
            counts,
            taxonomy,
            tree,
            metadata,
        })
    }

    /// Table without a tree and with unassigned taxonomy.
    pub fn from_counts(counts: CountMatrix, metadata: Metadata) -> Result<Self> {
        let taxonomy = Taxonomy::unassigned(counts.taxon_ids());
        Self::new(counts, taxonomy, None, metadata)
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn tree(&self) -> Option<&PhyloTree> {
        self.tree.as_ref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn n_taxa(&self) -> usize {
        self.counts.n_taxa()
    }

    pub fn sample_ids(&self) -> &[String] {
        self.counts.sample_ids()
    }

    pub fn taxon_ids(&self) -> &[String] {
        self.counts.taxon_ids()
    }

    /// Total count per sample (library sizes), in sample order.
    pub fn row_sums(&self) -> Vec<u64> {
        self.counts.sample_sums()
    }

    /// Total count per taxon, in taxon order.
    pub fn col_sums(&self) -> Vec<u64> {
        self.counts.taxon_sums()
    }

    /// Keep samples matching the predicate, preserving order.
    pub fn subset_samples<F>(&self, mut predicate: F) -> Result<Self>
    where
        F: FnMut(&SampleRef<'_>) -> bool,
    {
        let totals = self.row_sums();
        let keep: Vec<usize> = self
            .sample_ids()
            .iter()
            .enumerate()
            .filter(|(i, id)| {
                predicate(&SampleRef {
                    index: *i,
                    id: id.as_str(),
                    total: totals[*i],
                    metadata: &self.metadata,
                })
            })
            .map(|(i, _)| i)
            .collect();
        self.select_samples(&keep)
    }

    /// Keep taxa matching the predicate, preserving order. The tree is pruned
    /// to the surviving taxa.
    pub fn subset_taxa<F>(&self, mut predicate: F) -> Result<Self>
    where
        F: FnMut(&TaxonRef<'_>) -> bool,
    {
        let totals = self.col_sums();
        let keep: Vec<usize> = self
            .taxon_ids()
            .iter()
            .enumerate()
            .filter(|(i, id)| {
                predicate(&TaxonRef {
                    index: *i,
                    id: id.as_str(),
                    lineage: self.taxonomy.lineage_at(*i),
                    total: totals[*i],
                    prevalence: self.counts.prevalence_count(*i),
                })
            })
            .map(|(i, _)| i)
            .collect();
        self.select_taxa(&keep)
    }

    /// New table over the given sample indices, in the given order.
    pub fn select_samples(&self, indices: &[usize]) -> Result<Self> {
        let counts = self.counts.subset_samples(indices)?;
        let metadata = self.metadata.subset_samples(counts.sample_ids())?;
        debug!(
            from = self.n_samples(),
            to = counts.n_samples(),
            "subset samples"
        );
        Ok(Self {
            counts,
            taxonomy: self.taxonomy.clone(),
            tree: self.tree.clone(),
            metadata,
        })
    }

    /// New table over the given taxon indices, in the given order.
    pub fn select_taxa(&self, indices: &[usize]) -> Result<Self> {
        let counts = self.counts.subset_taxa(indices)?;
        let taxonomy = self.taxonomy.select(counts.taxon_ids())?;
        let tree = match &self.tree {
            Some(tree) if counts.n_taxa() > 0 => Some(tree.prune_to(counts.taxon_ids())?),
            _ => None,
        };
        debug!(from = self.n_taxa(), to = counts.n_taxa(), "subset taxa");
        Ok(Self {
            counts,
            taxonomy,
            tree,
            metadata: self.metadata.clone(),
        })
    }

    /// Remove samples with zero reads.
    pub fn drop_empty_samples(&self) -> Result<Self> {
        self.subset_samples(|s| s.total > 0)
    }

    /// Per-sample relative abundances as a dense samples × taxa matrix.
    /// Rows of empty samples are all zero.
    pub fn to_relative(&self) -> DMatrix<f64> {
        let totals = self.row_sums();
        let mut rel = self.counts.to_dense().transpose();
        for (i, &total) in totals.iter().enumerate() {
            if total > 0 {
                let mut row = rel.row_mut(i);
                row /= total as f64;
            }
        }
        rel
    }

    /// Phyla by descending total abundance.
    pub fn phylum_summary(&self) -> Vec<PhylumSummary> {
        let totals = self.col_sums();
        let mut by_phylum: HashMap<&str, (usize, u64)> = HashMap::new();
        for (i, phylum) in self.taxonomy.rank_labels(Rank::Phylum).into_iter().enumerate() {
            let entry = by_phylum.entry(phylum).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += totals[i];
        }
        let mut summary: Vec<PhylumSummary> = by_phylum
            .into_iter()
            .map(|(phylum, (n_taxa, total_abundance))| PhylumSummary {
                phylum: phylum.to_string(),
                n_taxa,
                total_abundance,
            })
            .collect();
        summary.sort_by(|a, b| {
            b.total_abundance
                .cmp(&a.total_abundance)
                .then_with(|| a.phylum.cmp(&b.phylum))
        });
        summary
    }
}

fn same_ids(expected: &[String], found: &[String], what: &str, source: &str) -> Result<()> {
    let expected_set: HashSet<&str> = expected.iter().map(|s| s.as_str()).collect();
    let found_set: HashSet<&str> = found.iter().map(|s| s.as_str()).collect();
    if let Some(missing) = expected.iter().find(|id| !found_set.contains(id.as_str())) {
        return Err(AmpliconError::DimensionMismatch(format!(
            "{} '{}' is missing from {}",
            what, missing, source
        )));
    }
    if let Some(extra) = found.iter().find(|id| !expected_set.contains(id.as_str())) {
        return Err(AmpliconError::DimensionMismatch(format!(
            "{} '{}' in {} is not in the count matrix",
            what, extra, source
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    fn create_test_table() -> AbundanceTable {
        // taxa × samples
        let counts = CountMatrix::from_rows(
            &[
                vec![10, 0, 5, 0],
                vec![3, 3, 3, 3],
                vec![0, 0, 0, 1],
            ],
            ids("ASV", 3),
            ids("S", 4),
        )
        .unwrap();
        let taxonomy = Taxonomy::new(
            ids("ASV", 3),
            vec![
                Lineage::from_labels([Some("Bacteria"), Some("Proteobacteria")]),
                Lineage::from_labels([Some("Bacteria"), Some("Firmicutes")]),
                Lineage::from_labels([Some("Bacteria"), Some("Proteobacteria")]),
            ],
        )
        .unwrap();
        let tree = PhyloTree::from_newick("((ASV1:0.1,ASV3:0.2):0.05,ASV2:0.3);").unwrap();
        // metadata deliberately in a different order
        let metadata = Metadata::from_records(
            vec!["zone".to_string()],
            vec![
                ("S4".to_string(), vec!["Basin".to_string()]),
                ("S1".to_string(), vec!["Fringe".to_string()]),
                ("S3".to_string(), vec!["Basin".to_string()]),
                ("S2".to_string(), vec!["Fringe".to_string()]),
            ],
        )
        .unwrap();
        AbundanceTable::new(counts, taxonomy, Some(tree), metadata).unwrap()
    }

    #[test]
    fn test_metadata_aligned_to_counts() {
        let table = create_test_table();
        assert_eq!(table.metadata().sample_ids(), table.sample_ids());
        assert_eq!(table.row_sums(), vec![13, 3, 8, 4]);
        assert_eq!(table.col_sums(), vec![15, 12, 1]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let counts = CountMatrix::from_rows(&[vec![1, 2]], ids("ASV", 1), ids("S", 2)).unwrap();
        let meta = Metadata::from_records(
            vec!["zone".to_string()],
            vec![("S1".to_string(), vec!["Basin".to_string()])],
        )
        .unwrap();
        let err = AbundanceTable::from_counts(counts.clone(), meta).unwrap_err();
        assert!(matches!(err, AmpliconError::DimensionMismatch(_)));

        let meta = Metadata::from_records(
            vec!["zone".to_string()],
            vec![
                ("S1".to_string(), vec!["Basin".to_string()]),
                ("S2".to_string(), vec!["Basin".to_string()]),
            ],
        )
        .unwrap();
        let taxonomy = Taxonomy::unassigned(&ids("OTU", 1));
        let err = AbundanceTable::new(counts, taxonomy, None, meta).unwrap_err();
        assert!(matches!(err, AmpliconError::DimensionMismatch(_)));
    }

    #[test]
    fn test_subset_taxa_prunes_tree() {
        let table = create_test_table();
        let sub = table.subset_taxa(|t| t.prevalence >= 2).unwrap();
        assert_eq!(sub.taxon_ids(), &["ASV1", "ASV2"]);
        assert_eq!(sub.taxonomy().taxon_ids(), sub.taxon_ids());
        assert_eq!(sub.tree().unwrap().tip_labels(), vec!["ASV1", "ASV2"]);
        assert_eq!(sub.n_samples(), table.n_samples());
        // remaining taxa keep their totals
        assert_eq!(sub.col_sums(), vec![15, 12]);
    }

    #[test]
    fn test_subset_samples_by_metadata() {
        let table = create_test_table();
        let basin = table
            .subset_samples(|s| s.get("zone").and_then(|v| v.as_categorical()) == Some("Basin"))
            .unwrap();
        assert_eq!(basin.sample_ids(), &["S3", "S4"]);
        assert_eq!(basin.metadata().sample_ids(), &["S3", "S4"]);
        assert_eq!(basin.n_taxa(), 3);
    }

    #[test]
    fn test_relative_and_phyla() {
        let table = create_test_table();
        let rel = table.to_relative();
        assert_eq!(rel.shape(), (4, 3));
        for i in 0..4 {
            assert_relative_eq!(rel.row(i).sum(), 1.0, epsilon = 1e-12);
        }
        let phyla = table.phylum_summary();
        assert_eq!(phyla[0].phylum, "Proteobacteria");
        assert_eq!(phyla[0].n_taxa, 2);
        assert_eq!(phyla[0].total_abundance, 16);
    }

    #[test]
    fn test_drop_empty_samples() {
        let table = create_test_table();
        let no_asv2 = table.subset_taxa(|t| t.id != "ASV2").unwrap();
        let kept = no_asv2.drop_empty_samples().unwrap();
        assert_eq!(kept.sample_ids(), &["S1", "S3", "S4"]);
    }
}
