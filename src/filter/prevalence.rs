//! Prevalence-based filtering of abundance tables.
//!
//! A taxon passes when it is observed (count > 0) in at least
//! `threshold × n_samples` samples. Phyla with fewer than
//! `min_taxa_per_phylum` passing taxa are removed entirely, which keeps
//! rare single-sample artifacts out of per-phylum summaries. Filtering a
//! filtered table with the same parameters returns it unchanged.

use crate::data::{AbundanceTable, Rank};
use crate::error::{AmpliconError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Parameters of the prevalence filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrevalenceFilter {
    /// Minimum prevalence as a fraction of samples.
    pub threshold: f64,
    /// Phyla with fewer passing taxa than this are dropped.
    pub min_taxa_per_phylum: usize,
}

impl Default for PrevalenceFilter {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            min_taxa_per_phylum: 2,
        }
    }
}

/// Per-taxon statistics behind a filtering decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrevalenceRow {
    pub taxon_id: String,
    pub phylum: String,
    /// Samples with a non-zero count.
    pub prevalence_count: usize,
    pub prevalence: f64,
    pub total_abundance: u64,
    pub retained: bool,
}

/// Per-phylum prevalence summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhylumPrevalence {
    pub phylum: String,
    pub n_taxa: usize,
    /// Taxa passing the sample threshold.
    pub n_passing: usize,
    pub mean_prevalence: f64,
    pub total_prevalence: usize,
}

/// The prevalence table used for a filtering decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrevalenceTable {
    pub rows: Vec<PrevalenceRow>,
}

impl PrevalenceTable {
    /// Per-taxon prevalence and abundance of a table. No decision is applied
    /// (`retained` is true for every row).
    pub fn compute(table: &AbundanceTable) -> Self {
        let n_samples = table.n_samples();
        let totals = table.col_sums();
        let phyla = table.taxonomy().rank_labels(Rank::Phylum);
        let rows = (0..table.n_taxa())
            .into_par_iter()
            .map(|i| {
                let count = table.counts().prevalence_count(i);
                PrevalenceRow {
                    taxon_id: table.taxon_ids()[i].clone(),
                    phylum: phyla[i].to_string(),
                    prevalence_count: count,
                    prevalence: if n_samples > 0 {
                        count as f64 / n_samples as f64
                    } else {
                        0.0
                    },
                    total_abundance: totals[i],
                    retained: true,
                }
            })
            .collect();
        Self { rows }
    }

    /// Summary per phylum, sorted by phylum name.
    pub fn by_phylum(&self, threshold_samples: f64) -> Vec<PhylumPrevalence> {
        let mut groups: BTreeMap<&str, Vec<&PrevalenceRow>> = BTreeMap::new();
        for row in &self.rows {
            groups.entry(row.phylum.as_str()).or_default().push(row);
        }
        groups
            .into_iter()
            .map(|(phylum, rows)| {
                let total: usize = rows.iter().map(|r| r.prevalence_count).sum();
                PhylumPrevalence {
                    phylum: phylum.to_string(),
                    n_taxa: rows.len(),
                    n_passing: rows
                        .iter()
                        .filter(|r| r.prevalence_count as f64 >= threshold_samples)
                        .count(),
                    mean_prevalence: total as f64 / rows.len() as f64,
                    total_prevalence: total,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write as TSV.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(
            writer,
            "taxon_id\tphylum\tprevalence_count\tprevalence\ttotal_abundance\tretained"
        )?;
        for r in &self.rows {
            writeln!(
                writer,
                "{}\t{}\t{}\t{:.6}\t{}\t{}",
                r.taxon_id, r.phylum, r.prevalence_count, r.prevalence, r.total_abundance, r.retained
            )?;
        }
        Ok(())
    }
}

/// Filtered table plus the audit trail of the decision.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub table: AbundanceTable,
    pub prevalence: PrevalenceTable,
    pub dropped_phyla: Vec<String>,
    /// Minimum number of samples a taxon had to be observed in.
    pub threshold_samples: f64,
}

impl FilterOutcome {
    pub fn n_before(&self) -> usize {
        self.prevalence.len()
    }

    pub fn n_after(&self) -> usize {
        self.table.n_taxa()
    }
}

impl std::fmt::Display for FilterOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Prevalence filter")?;
        writeln!(f, "  Threshold: {:.2} samples", self.threshold_samples)?;
        writeln!(f, "  Before:    {} taxa", self.n_before())?;
        writeln!(f, "  After:     {} taxa", self.n_after())?;
        writeln!(f, "  Dropped phyla: {}", self.dropped_phyla.len())?;
        Ok(())
    }
}

impl PrevalenceFilter {
    pub fn new(threshold: f64, min_taxa_per_phylum: usize) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AmpliconError::InvalidParameter(
                "Prevalence threshold must be between 0 and 1".to_string(),
            ));
        }
        Ok(Self {
            threshold,
            min_taxa_per_phylum,
        })
    }

    /// Apply the filter. Samples are never removed.
    pub fn apply(&self, table: &AbundanceTable) -> Result<FilterOutcome> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(AmpliconError::InvalidParameter(
                "Prevalence threshold must be between 0 and 1".to_string(),
            ));
        }
        let threshold_samples = self.threshold * table.n_samples() as f64;
        let mut prevalence = PrevalenceTable::compute(table);

        let passes = |r: &PrevalenceRow| r.prevalence_count as f64 >= threshold_samples;

        let mut dropped_phyla: Vec<String> = {
            let mut passing_per_phylum: HashMap<&str, usize> = HashMap::new();
            for row in &prevalence.rows {
                let entry = passing_per_phylum.entry(row.phylum.as_str()).or_insert(0);
                if passes(row) {
                    *entry += 1;
                }
            }
            passing_per_phylum
                .iter()
                .filter(|&(_, &n)| n < self.min_taxa_per_phylum)
                .map(|(p, _)| p.to_string())
                .collect()
        };
        dropped_phyla.sort();
        let dropped: HashSet<&str> = dropped_phyla.iter().map(|s| s.as_str()).collect();

        let mut keep = Vec::new();
        for (i, row) in prevalence.rows.iter_mut().enumerate() {
            row.retained = !dropped.contains(row.phylum.as_str()) && passes(row);
            if row.retained {
                keep.push(i);
            }
        }
        for phylum in &dropped_phyla {
            debug!(phylum = %phylum, "dropping phylum below minimum prevalent taxa");
        }

        let filtered = table.select_taxa(&keep)?;
        info!(
            threshold_samples,
            before = table.n_taxa(),
            after = filtered.n_taxa(),
            dropped_phyla = dropped_phyla.len(),
            "prevalence filter applied"
        );

        Ok(FilterOutcome {
            table: filtered,
            prevalence,
            dropped_phyla,
            threshold_samples,
        })
    }
}

/// Filter with the given threshold and the default phylum rule.
pub fn filter_prevalence(table: &AbundanceTable, threshold: f64) -> Result<FilterOutcome> {
    PrevalenceFilter::new(threshold, PrevalenceFilter::default().min_taxa_per_phylum)?.apply(table)
}
