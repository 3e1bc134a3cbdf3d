//! Controlled sampling covariates of the study design.
//!
//! Each covariate has a closed domain of levels. Parsing a value outside the
//! domain is an [`AmpliconError::InvalidLevel`], never a silent new level.

use crate::error::{AmpliconError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position of the sampling site along the forest gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Zone {
    Fringe,
    Basin,
    Impaired,
}

/// Hydrological season of collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Season {
    Dry,
    Flood,
}

/// Sediment depth in centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Depth {
    D5,
    D20,
    D40,
}

/// Depth collapsed into surface vs. subsurface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DepthGroup {
    /// 5 cm.
    Shallow,
    /// 20 and 40 cm.
    Deep,
}

impl Zone {
    pub const ALL: [Zone; 3] = [Zone::Fringe, Zone::Basin, Zone::Impaired];

    pub fn label(&self) -> &'static str {
        match self {
            Zone::Fringe => "Fringe",
            Zone::Basin => "Basin",
            Zone::Impaired => "Impaired",
        }
    }
}

impl Season {
    pub const ALL: [Season; 2] = [Season::Dry, Season::Flood];

    pub fn label(&self) -> &'static str {
        match self {
            Season::Dry => "dry",
            Season::Flood => "flood",
        }
    }
}

impl Depth {
    pub const ALL: [Depth; 3] = [Depth::D5, Depth::D20, Depth::D40];

    pub fn label(&self) -> &'static str {
        match self {
            Depth::D5 => "5",
            Depth::D20 => "20",
            Depth::D40 => "40",
        }
    }

    /// Collapse into the two-level grouping.
    pub fn group(&self) -> DepthGroup {
        match self {
            Depth::D5 => DepthGroup::Shallow,
            Depth::D20 | Depth::D40 => DepthGroup::Deep,
        }
    }
}

impl DepthGroup {
    pub const ALL: [DepthGroup; 2] = [DepthGroup::Shallow, DepthGroup::Deep];

    pub fn label(&self) -> &'static str {
        match self {
            DepthGroup::Shallow => "5",
            DepthGroup::Deep => "20-40",
        }
    }
}

fn invalid(column: &str, value: &str) -> AmpliconError {
    AmpliconError::InvalidLevel {
        column: column.to_string(),
        value: value.to_string(),
    }
}

impl FromStr for Zone {
    type Err = AmpliconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fringe" => Ok(Zone::Fringe),
            "basin" => Ok(Zone::Basin),
            "impaired" => Ok(Zone::Impaired),
            _ => Err(invalid("zone", s)),
        }
    }
}

impl FromStr for Season {
    type Err = AmpliconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dry" => Ok(Season::Dry),
            "flood" => Ok(Season::Flood),
            _ => Err(invalid("season", s)),
        }
    }
}

impl FromStr for Depth {
    type Err = AmpliconError;

    fn from_str(s: &str) -> Result<Self> {
        // Accept "5", "5.0" and "5cm".
        let trimmed = s.trim().trim_end_matches("cm");
        match trimmed.parse::<f64>() {
            Ok(v) if v == 5.0 => Ok(Depth::D5),
            Ok(v) if v == 20.0 => Ok(Depth::D20),
            Ok(v) if v == 40.0 => Ok(Depth::D40),
            _ => Err(invalid("depth", s)),
        }
    }
}

impl FromStr for DepthGroup {
    type Err = AmpliconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "5" => Ok(DepthGroup::Shallow),
            "20-40" => Ok(DepthGroup::Deep),
            _ => Err(invalid("depth_group", s)),
        }
    }
}

macro_rules! display_via_label {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        })*
    };
}

display_via_label!(Zone, Season, Depth, DepthGroup);

/// A grouping factor usable in designs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Zone,
    Season,
    Depth,
    DepthGroup,
}

impl Factor {
    pub const ALL: [Factor; 4] = [Factor::Zone, Factor::Season, Factor::Depth, Factor::DepthGroup];

    /// Metadata column holding this factor.
    pub fn column(&self) -> &'static str {
        match self {
            Factor::Zone => "zone",
            Factor::Season => "season",
            Factor::Depth => "depth",
            Factor::DepthGroup => "depth_group",
        }
    }

    /// Controlled levels, in canonical order.
    pub fn levels(&self) -> Vec<&'static str> {
        match self {
            Factor::Zone => Zone::ALL.iter().map(|z| z.label()).collect(),
            Factor::Season => Season::ALL.iter().map(|s| s.label()).collect(),
            Factor::Depth => Depth::ALL.iter().map(|d| d.label()).collect(),
            Factor::DepthGroup => DepthGroup::ALL.iter().map(|d| d.label()).collect(),
        }
    }

    /// Validate a raw value and return its canonical label.
    pub fn canonical(&self, raw: &str) -> Result<&'static str> {
        Ok(match self {
            Factor::Zone => raw.parse::<Zone>()?.label(),
            Factor::Season => raw.parse::<Season>()?.label(),
            Factor::Depth => raw.parse::<Depth>()?.label(),
            Factor::DepthGroup => raw.parse::<DepthGroup>()?.label(),
        })
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for Factor {
    type Err = AmpliconError;

    fn from_str(s: &str) -> Result<Self> {
        Factor::ALL
            .iter()
            .copied()
            .find(|f| f.column() == s.trim())
            .ok_or_else(|| AmpliconError::MissingColumn(s.to_string()))
    }
}
