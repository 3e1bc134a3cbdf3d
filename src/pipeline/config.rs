//! Battery configuration: the parameter surface and the ordered test grid.

use crate::correct::Correction;
use crate::data::{Contrast, Design, Factor, Interaction};
use crate::diversity::{AlphaMetric, DistanceMetric};
use crate::error::{AmpliconError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One configured test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "test", rename_all = "snake_case")]
pub enum TestSpec {
    /// Shapiro-Wilk of an alpha metric within every level of a factor.
    Normality { metric: AlphaMetric, factor: Factor },
    /// PERMANOVA of the distance matrix.
    Permanova { design: Design },
    /// PERMANOVA on every level pair of a factor.
    PairwisePermanova { factor: Factor },
    /// Homogeneity of dispersions.
    Dispersion { factor: Factor },
    KruskalWallis { metric: AlphaMetric, factor: Factor },
    PairwiseWilcoxon { metric: AlphaMetric, factor: Factor },
    DifferentialAbundance { contrast: Contrast },
}

impl TestSpec {
    /// Test family name.
    pub fn name(&self) -> &'static str {
        match self {
            TestSpec::Normality { .. } => "shapiro_wilk",
            TestSpec::Permanova { .. } => "permanova",
            TestSpec::PairwisePermanova { .. } => "pairwise_permanova",
            TestSpec::Dispersion { .. } => "betadisper",
            TestSpec::KruskalWallis { .. } => "kruskal_wallis",
            TestSpec::PairwiseWilcoxon { .. } => "pairwise_wilcoxon",
            TestSpec::DifferentialAbundance { .. } => "differential_abundance",
        }
    }

    /// Grouping factors involved, as a display string.
    pub fn factors(&self) -> String {
        match self {
            TestSpec::Permanova { design } => design.to_string(),
            TestSpec::DifferentialAbundance { contrast } => contrast.factor.to_string(),
            TestSpec::Normality { factor, .. }
            | TestSpec::PairwisePermanova { factor }
            | TestSpec::Dispersion { factor }
            | TestSpec::KruskalWallis { factor, .. }
            | TestSpec::PairwiseWilcoxon { factor, .. } => factor.to_string(),
        }
    }

    /// Alpha metric tested, if any.
    pub fn metric(&self) -> Option<AlphaMetric> {
        match self {
            TestSpec::Normality { metric, .. }
            | TestSpec::KruskalWallis { metric, .. }
            | TestSpec::PairwiseWilcoxon { metric, .. } => Some(*metric),
            _ => None,
        }
    }
}

impl std::fmt::Display for TestSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.metric() {
            Some(m) => write!(f, "{}({} ~ {})", self.name(), m, self.factors()),
            None => match self {
                TestSpec::DifferentialAbundance { contrast } => {
                    write!(f, "{}({})", self.name(), contrast)
                }
                _ => write!(f, "{}({})", self.name(), self.factors()),
            },
        }
    }
}

/// Configuration of a battery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub n_permutations: usize,
    /// Significance threshold.
    pub alpha: f64,
    /// Minimum |log2 fold change| for differential abundance.
    pub lfc_threshold: f64,
    /// Minimum prevalence as a fraction of samples.
    pub prevalence_threshold: f64,
    pub min_taxa_per_phylum: usize,
    pub ordination_axes: usize,
    pub correction: Correction,
    pub distance: DistanceMetric,
    /// Test `i` runs on an independent sub-stream of this seed.
    pub seed: u64,
    /// Run tests and permutations on the rayon pool.
    pub parallel: bool,
    pub tests: Vec<TestSpec>,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            n_permutations: 9999,
            alpha: 0.05,
            lfc_threshold: 1.0,
            prevalence_threshold: 0.02,
            min_taxa_per_phylum: 2,
            ordination_axes: 2,
            correction: Correction::Bonferroni,
            distance: DistanceMetric::BrayCurtis,
            seed: 42,
            parallel: true,
            tests: Vec::new(),
        }
    }
}

impl BatteryConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(AmpliconError::from)
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`/`.yml` or `.json` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            _ => Self::from_yaml(&text),
        }
    }

    /// Reject parameters outside their domain.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.prevalence_threshold) {
            return Err(AmpliconError::InvalidParameter(
                "prevalence_threshold must be between 0 and 1".to_string(),
            ));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(AmpliconError::InvalidParameter(
                "alpha must be in (0, 1)".to_string(),
            ));
        }
        if self.lfc_threshold < 0.0 {
            return Err(AmpliconError::InvalidParameter(
                "lfc_threshold must be non-negative".to_string(),
            ));
        }
        if self.ordination_axes == 0 {
            return Err(AmpliconError::InvalidParameter(
                "ordination_axes must be at least 1".to_string(),
            ));
        }
        for spec in &self.tests {
            if let TestSpec::Permanova { design } = spec {
                Design::new(design.factors.clone(), design.interaction)?;
            }
        }
        Ok(())
    }

    /// The standard study grid over zone, season and depth group.
    pub fn example() -> Self {
        let factors = [Factor::Zone, Factor::Season, Factor::DepthGroup];
        let metrics = [
            AlphaMetric::Observed,
            AlphaMetric::Chao1,
            AlphaMetric::Shannon,
            AlphaMetric::Simpson,
        ];
        let mut tests = Vec::new();

        for metric in metrics {
            for factor in factors {
                tests.push(TestSpec::Normality { metric, factor });
                tests.push(TestSpec::KruskalWallis { metric, factor });
            }
            tests.push(TestSpec::PairwiseWilcoxon {
                metric,
                factor: Factor::Zone,
            });
        }

        for factor in factors {
            tests.push(TestSpec::Permanova {
                design: Design::single(factor),
            });
        }
        for (i, a) in factors.iter().enumerate() {
            for b in &factors[i + 1..] {
                for interaction in [Interaction::None, Interaction::Full] {
                    tests.push(TestSpec::Permanova {
                        design: Design {
                            factors: vec![*a, *b],
                            interaction,
                        },
                    });
                }
            }
        }
        for interaction in [Interaction::None, Interaction::Pairwise, Interaction::Full] {
            tests.push(TestSpec::Permanova {
                design: Design {
                    factors: factors.to_vec(),
                    interaction,
                },
            });
        }
        tests.push(TestSpec::PairwisePermanova {
            factor: Factor::Zone,
        });
        for factor in factors {
            tests.push(TestSpec::Dispersion { factor });
        }

        for (numerator, denominator) in [
            ("Impaired", "Fringe"),
            ("Basin", "Fringe"),
            ("Impaired", "Basin"),
        ] {
            tests.push(TestSpec::DifferentialAbundance {
                contrast: Contrast {
                    factor: Factor::Zone,
                    numerator: numerator.to_string(),
                    denominator: denominator.to_string(),
                },
            });
        }

        Self {
            tests,
            ..Default::default()
        }
    }
}
