//! Ranked taxonomic assignments for taxa.

use crate::error::{AmpliconError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Label used for any rank without an assignment.
pub const UNKNOWN: &str = "Unknown";

/// Taxonomic ranks carried by the taxonomy table, root first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl Rank {
    /// All ranks in root-to-tip order.
    pub const ALL: [Rank; 7] = [
        Rank::Kingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
    ];

    /// Column header name.
    pub fn name(&self) -> &'static str {
        match self {
            Rank::Kingdom => "Kingdom",
            Rank::Phylum => "Phylum",
            Rank::Class => "Class",
            Rank::Order => "Order",
            Rank::Family => "Family",
            Rank::Genus => "Genus",
            Rank::Species => "Species",
        }
    }

    /// Parse a header name (case-insensitive; "Domain" maps to Kingdom).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "kingdom" | "domain" => Some(Rank::Kingdom),
            "phylum" => Some(Rank::Phylum),
            "class" => Some(Rank::Class),
            "order" => Some(Rank::Order),
            "family" => Some(Rank::Family),
            "genus" => Some(Rank::Genus),
            "species" => Some(Rank::Species),
            _ => None,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Ranked labels for a single taxon. Missing ranks hold [`UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    labels: [String; 7],
}

impl Lineage {
    /// Build from optional labels in root-to-tip order; absent, blank or `NA`
    /// entries become "Unknown".
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let mut out: [String; 7] = std::array::from_fn(|_| UNKNOWN.to_string());
        for (slot, label) in out.iter_mut().zip(labels) {
            if let Some(label) = label {
                *slot = normalize_label(label.as_ref());
            }
        }
        Self { labels: out }
    }

    /// Label at a rank.
    pub fn get(&self, rank: Rank) -> &str {
        &self.labels[rank.index()]
    }

    /// Whether a rank was assigned.
    pub fn is_known(&self, rank: Rank) -> bool {
        self.get(rank) != UNKNOWN
    }

    /// Deepest assigned rank, if any.
    pub fn deepest_known(&self) -> Option<(Rank, &str)> {
        Rank::ALL
            .iter()
            .rev()
            .find(|r| self.is_known(**r))
            .map(|r| (*r, self.get(*r)))
    }
}

fn normalize_label(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('"');
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") {
        UNKNOWN.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Taxonomy table mapping taxon IDs to lineages, in a fixed taxon order.
#[derive(Debug, Clone, PartialEq)]
pub struct Taxonomy {
    taxon_ids: Vec<String>,
    lineages: Vec<Lineage>,
    index: HashMap<String, usize>,
}

impl Taxonomy {
    /// Create from parallel taxon IDs and lineages.
    pub fn new(taxon_ids: Vec<String>, lineages: Vec<Lineage>) -> Result<Self> {
        if taxon_ids.len() != lineages.len() {
            return Err(AmpliconError::DimensionMismatch(format!(
                "{} taxon IDs but {} lineages",
                taxon_ids.len(),
                lineages.len()
            )));
        }
        let mut index = HashMap::with_capacity(taxon_ids.len());
        for (i, id) in taxon_ids.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(AmpliconError::DimensionMismatch(format!(
                    "duplicate taxon ID '{}' in taxonomy",
                    id
                )));
            }
        }
        Ok(Self {
            taxon_ids,
            lineages,
            index,
        })
    }

    /// A taxonomy where every rank of every taxon is unknown.
    pub fn unassigned(taxon_ids: &[String]) -> Self {
        let lineages = taxon_ids
            .iter()
            .map(|_| Lineage::from_labels(std::iter::empty::<Option<&str>>()))
            .collect();
        let index = taxon_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Self {
            taxon_ids: taxon_ids.to_vec(),
            lineages,
            index,
        }
    }

    /// Load a taxonomy TSV.
    ///
    /// Expected format: header `taxon_id<TAB>Kingdom<TAB>Phylum...`; rank
    /// columns are matched by name and may appear in any order or be absent.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| AmpliconError::EmptyData("Empty taxonomy file".to_string()))??;
        let columns: Vec<Option<Rank>> = header_line
            .split('\t')
            .skip(1)
            .map(Rank::from_name)
            .collect();
        if columns.iter().all(|c| c.is_none()) {
            return Err(AmpliconError::MissingColumn("Phylum".to_string()));
        }

        let mut taxon_ids = Vec::new();
        let mut lineages = Vec::new();
        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let mut ranked: [Option<&str>; 7] = [None; 7];
            for (col, value) in columns.iter().zip(fields.iter().skip(1)) {
                if let Some(rank) = col {
                    ranked[rank.index()] = Some(value);
                }
            }
            taxon_ids.push(fields[0].trim().to_string());
            lineages.push(Lineage::from_labels(ranked));
        }

        if taxon_ids.is_empty() {
            return Err(AmpliconError::EmptyData("No taxa in taxonomy".to_string()));
        }
        Self::new(taxon_ids, lineages)
    }

    /// Write as TSV with all ranks.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write!(writer, "taxon_id")?;
        for rank in Rank::ALL {
            write!(writer, "\t{}", rank)?;
        }
        writeln!(writer)?;
        for (id, lineage) in self.taxon_ids.iter().zip(&self.lineages) {
            write!(writer, "{}", id)?;
            for rank in Rank::ALL {
                write!(writer, "\t{}", lineage.get(rank))?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Taxon IDs in table order.
    pub fn taxon_ids(&self) -> &[String] {
        &self.taxon_ids
    }

    /// Number of taxa.
    pub fn len(&self) -> usize {
        self.taxon_ids.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.taxon_ids.is_empty()
    }

    /// Lineage of a taxon.
    pub fn lineage(&self, taxon_id: &str) -> Option<&Lineage> {
        self.index.get(taxon_id).map(|&i| &self.lineages[i])
    }

    /// Lineage by position.
    pub fn lineage_at(&self, index: usize) -> &Lineage {
        &self.lineages[index]
    }

    /// Labels at one rank, in taxon order.
    pub fn rank_labels(&self, rank: Rank) -> Vec<&str> {
        self.lineages.iter().map(|l| l.get(rank)).collect()
    }

    /// Reorder/subset to exactly the given taxon IDs.
    pub fn select(&self, taxon_ids: &[String]) -> Result<Self> {
        let mut lineages = Vec::with_capacity(taxon_ids.len());
        for id in taxon_ids {
            let lineage = self.lineage(id).ok_or_else(|| {
                AmpliconError::DimensionMismatch(format!("taxon '{}' missing from taxonomy", id))
            })?;
            lineages.push(lineage.clone());
        }
        Self::new(taxon_ids.to_vec(), lineages)
    }
}
