//! Battery runner: filter, compute diversity, then run every configured test.
//!
//! Each test moves through `Configured → Executed → Recorded`, or ends in
//! `Failed` when its own data cannot support it. When the filtered table
//! cannot support diversity at all, every test fails with that reason.
//! Structural errors (misaligned inputs, bad parameters) abort the whole run
//! instead.

use crate::data::{AbundanceTable, DaResultSet, Factor};
use crate::diversity::{AlphaMetric, AlphaTable, DistanceMatrix, Pcoa};
use crate::error::{AmpliconError, Result};
use crate::filter::{FilterOutcome, PrevalenceFilter};
use crate::pipeline::config::{BatteryConfig, TestSpec};
use crate::test::rng::stream_seed;
use crate::test::{
    betadisper, differential_abundance, kruskal_wallis, pairwise_permanova, pairwise_wilcoxon,
    permanova, shapiro_wilk, DaConfig, Dispersion, Grouping, KruskalWallis, PairwisePermanova,
    PairwiseRankSum, Permanova, PermanovaConfig,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Shapiro-Wilk within one level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupNormality {
    pub level: String,
    pub n: usize,
    pub w: Option<f64>,
    pub p_value: Option<f64>,
    /// Set when the level is too small or constant.
    pub reason: Option<String>,
}

impl GroupNormality {
    pub fn is_computed(&self) -> bool {
        self.reason.is_none()
    }
}

/// Result of one executed test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum TestOutcome {
    Normality {
        metric: AlphaMetric,
        factor: Factor,
        groups: Vec<GroupNormality>,
    },
    Permanova(Permanova),
    PairwisePermanova(PairwisePermanova),
    Dispersion(Dispersion),
    KruskalWallis {
        metric: AlphaMetric,
        factor: Factor,
        result: KruskalWallis,
    },
    PairwiseWilcoxon {
        metric: AlphaMetric,
        factor: Factor,
        result: PairwiseRankSum,
    },
    DifferentialAbundance(DaResultSet),
}

/// Lifecycle of one test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TestState {
    Configured,
    /// Computed, not yet collected.
    Executed { outcome: Box<TestOutcome> },
    Recorded { outcome: Box<TestOutcome> },
    Failed { kind: String, reason: String },
}

/// One configured test and its state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    /// Position in the configured grid.
    pub index: usize,
    pub spec: TestSpec,
    pub seed: u64,
    pub state: TestState,
}

impl TestRun {
    pub fn new(index: usize, spec: TestSpec, seed: u64) -> Self {
        Self {
            index,
            spec,
            seed,
            state: TestState::Configured,
        }
    }

    /// Run the test. Statistical failures end in `Failed`; structural ones
    /// are returned.
    pub fn execute(&mut self, inputs: &BatteryInputs, config: &BatteryConfig) -> Result<()> {
        if !matches!(self.state, TestState::Configured) {
            return Err(AmpliconError::InvalidParameter(format!(
                "test {} ({}) has already run",
                self.index, self.spec
            )));
        }
        debug!(index = self.index, test = %self.spec, "running test");
        match run_test(&self.spec, self.seed, inputs, config) {
            Ok(outcome) => {
                self.state = TestState::Executed {
                    outcome: Box::new(outcome),
                };
                Ok(())
            }
            Err(e) if !e.is_structural() => {
                warn!(index = self.index, test = %self.spec, error = %e, "test failed");
                self.state = TestState::Failed {
                    kind: e.kind().to_string(),
                    reason: e.to_string(),
                };
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Move an executed test to `Recorded`.
    pub fn record(&mut self) {
        let state = std::mem::replace(&mut self.state, TestState::Configured);
        self.state = match state {
            TestState::Executed { outcome } => TestState::Recorded { outcome },
            other => other,
        };
    }

    pub fn outcome(&self) -> Option<&TestOutcome> {
        match &self.state {
            TestState::Executed { outcome } | TestState::Recorded { outcome } => {
                Some(outcome.as_ref())
            }
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, TestState::Failed { .. })
    }

    /// Mark a configured test failed without running it.
    pub fn fail(&mut self, error: &AmpliconError) {
        if matches!(self.state, TestState::Configured) {
            self.state = TestState::Failed {
                kind: error.kind().to_string(),
                reason: error.to_string(),
            };
        }
    }
}

/// Shared, read-only inputs of every test.
#[derive(Debug, Clone)]
pub struct BatteryInputs {
    /// Filtered table, empty samples removed.
    pub table: AbundanceTable,
    pub alpha: AlphaTable,
    pub distances: DistanceMatrix,
}

/// Filter summary kept in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSummary {
    pub taxa_before: usize,
    pub taxa_after: usize,
    pub samples_after: usize,
    pub threshold_samples: f64,
    pub dropped_phyla: Vec<String>,
}

impl FilterSummary {
    fn new(outcome: &FilterOutcome, samples_after: usize) -> Self {
        Self {
            taxa_before: outcome.n_before(),
            taxa_after: outcome.n_after(),
            samples_after,
            threshold_samples: outcome.threshold_samples,
            dropped_phyla: outcome.dropped_phyla.clone(),
        }
    }
}

/// Everything a battery run produced.
#[derive(Debug, Clone)]
pub struct BatteryReport {
    pub filter: FilterSummary,
    /// Absent when diversity could not be computed on the filtered table.
    pub inputs: Option<BatteryInputs>,
    pub ordination: Option<Pcoa>,
    pub runs: Vec<TestRun>,
}

impl BatteryReport {
    pub fn outcomes(&self) -> impl Iterator<Item = (&TestSpec, &TestOutcome)> {
        self.runs
            .iter()
            .filter_map(|r| r.outcome().map(|o| (&r.spec, o)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestRun> {
        self.runs.iter().filter(|r| r.is_failed())
    }

    /// Differential abundance tables in configured order.
    pub fn da_results(&self) -> impl Iterator<Item = &DaResultSet> {
        self.outcomes().filter_map(|(_, o)| match o {
            TestOutcome::DifferentialAbundance(set) => Some(set),
            _ => None,
        })
    }
}

/// Filter `table`, compute alpha, beta and ordination, and run every test of
/// `config.tests`.
pub fn run_battery(table: &AbundanceTable, config: &BatteryConfig) -> Result<BatteryReport> {
    config.validate()?;
    info!(
        samples = table.n_samples(),
        taxa = table.n_taxa(),
        tests = config.tests.len(),
        "starting battery"
    );

    let filter = PrevalenceFilter::new(config.prevalence_threshold, config.min_taxa_per_phylum)?;
    let outcome = filter.apply(table)?;
    let filtered = outcome.table.drop_empty_samples()?;
    if filtered.n_samples() < outcome.table.n_samples() {
        warn!(
            dropped = outcome.table.n_samples() - filtered.n_samples(),
            "samples without reads after filtering"
        );
    }
    let summary = FilterSummary::new(&outcome, filtered.n_samples());

    let mut runs: Vec<TestRun> = config
        .tests
        .iter()
        .enumerate()
        .map(|(i, spec)| TestRun::new(i, spec.clone(), test_seed(config.seed, i)))
        .collect();

    let (inputs, ordination) = match diversity(&filtered, config) {
        Ok((alpha, distances, ordination)) => {
            let inputs = BatteryInputs {
                table: filtered,
                alpha,
                distances,
            };
            if config.parallel {
                runs.par_iter_mut()
                    .try_for_each(|run| run.execute(&inputs, config))?;
            } else {
                for run in runs.iter_mut() {
                    run.execute(&inputs, config)?;
                }
            }
            (Some(inputs), Some(ordination))
        }
        Err(e) if !e.is_structural() => {
            warn!(error = %e, "diversity unavailable, every test fails");
            for run in runs.iter_mut() {
                run.fail(&e);
            }
            (None, None)
        }
        Err(e) => return Err(e),
    };
    for run in runs.iter_mut() {
        run.record();
    }

    let failed = runs.iter().filter(|r| r.is_failed()).count();
    info!(recorded = runs.len() - failed, failed, "battery finished");

    Ok(BatteryReport {
        filter: summary,
        inputs,
        ordination,
        runs,
    })
}

/// Seed of test `index`: an independent sub-stream of the battery seed.
fn test_seed(seed: u64, index: usize) -> u64 {
    stream_seed(seed, index)
}

/// Alpha table, distance matrix and ordination of the filtered table.
fn diversity(
    table: &AbundanceTable,
    config: &BatteryConfig,
) -> Result<(AlphaTable, DistanceMatrix, Pcoa)> {
    let alpha = AlphaTable::compute_all(table)?;
    let distances = DistanceMatrix::compute(table, config.distance)?;
    let ordination = Pcoa::compute(&distances, config.ordination_axes)?;
    info!(
        metric = config.distance.name(),
        axes = ordination.n_axes(),
        "diversity computed"
    );
    Ok((alpha, distances, ordination))
}

fn run_test(
    spec: &TestSpec,
    seed: u64,
    inputs: &BatteryInputs,
    config: &BatteryConfig,
) -> Result<TestOutcome> {
    let metadata = inputs.table.metadata();
    let permanova_config = PermanovaConfig {
        n_permutations: config.n_permutations,
        seed,
        parallel: config.parallel,
    };

    let outcome = match spec {
        TestSpec::Normality { metric, factor } => {
            let (values, grouping) = metric_by_factor(inputs, *metric, *factor)?;
            grouping.require_groups(&format!("normality of {} by '{}'", metric, factor))?;
            let groups = grouping
                .levels()
                .iter()
                .enumerate()
                .map(|(level, name)| {
                    let x: Vec<f64> = grouping.members(level).iter().map(|&i| values[i]).collect();
                    group_normality(name, &x)
                })
                .collect::<Result<Vec<_>>>()?;
            TestOutcome::Normality {
                metric: *metric,
                factor: *factor,
                groups,
            }
        }
        TestSpec::Permanova { design } => TestOutcome::Permanova(permanova(
            &inputs.distances,
            metadata,
            design,
            &permanova_config,
        )?),
        TestSpec::PairwisePermanova { factor } => {
            TestOutcome::PairwisePermanova(pairwise_permanova(
                &inputs.distances,
                metadata,
                *factor,
                &permanova_config,
                config.correction,
            )?)
        }
        TestSpec::Dispersion { factor } => TestOutcome::Dispersion(betadisper(
            &inputs.distances,
            metadata,
            *factor,
            &permanova_config,
        )?),
        TestSpec::KruskalWallis { metric, factor } => {
            let (values, grouping) = metric_by_factor(inputs, *metric, *factor)?;
            TestOutcome::KruskalWallis {
                metric: *metric,
                factor: *factor,
                result: kruskal_wallis(&values, &grouping)?,
            }
        }
        TestSpec::PairwiseWilcoxon { metric, factor } => {
            let (values, grouping) = metric_by_factor(inputs, *metric, *factor)?;
            TestOutcome::PairwiseWilcoxon {
                metric: *metric,
                factor: *factor,
                result: pairwise_wilcoxon(&values, &grouping, config.correction, config.alpha)?,
            }
        }
        TestSpec::DifferentialAbundance { contrast } => {
            let da_config = DaConfig {
                alpha: config.alpha,
                lfc_threshold: config.lfc_threshold,
                ..Default::default()
            };
            TestOutcome::DifferentialAbundance(differential_abundance(
                &inputs.table,
                contrast,
                &da_config,
            )?)
        }
    };
    Ok(outcome)
}

/// Alpha values joined with factor levels; samples missing either are left out.
fn metric_by_factor(
    inputs: &BatteryInputs,
    metric: AlphaMetric,
    factor: Factor,
) -> Result<(Vec<f64>, Grouping)> {
    let values = inputs.alpha.metric_values(metric)?;
    let levels = inputs.table.metadata().factor_values(factor)?;
    if values.len() != levels.len() {
        return Err(AmpliconError::DimensionMismatch(format!(
            "{} alpha values for {} metadata rows",
            values.len(),
            levels.len()
        )));
    }
    let (x, labels): (Vec<f64>, Vec<String>) = values
        .into_iter()
        .zip(levels)
        .filter_map(|(v, l)| Some((v?, l?)))
        .unzip();
    Ok((x, Grouping::new(&labels)))
}

fn group_normality(level: &str, values: &[f64]) -> Result<GroupNormality> {
    match shapiro_wilk(values) {
        Ok(sw) => Ok(GroupNormality {
            level: level.to_string(),
            n: sw.n,
            w: Some(sw.w),
            p_value: Some(sw.p_value),
            reason: None,
        }),
        Err(e) if e.is_not_computable() => Ok(GroupNormality {
            level: level.to_string(),
            n: values.len(),
            w: None,
            p_value: None,
            reason: Some(e.to_string()),
        }),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Contrast, CountMatrix, Design, Metadata};

    /// 12 samples, 3 zones of 4, two seasons; Proteobacteria ASVs shift
    /// with zone.
    fn create_test_table() -> AbundanceTable {
        let zones = ["Fringe", "Basin", "Impaired"];
        let mut records = Vec::new();
        let mut columns: Vec<Vec<u64>> = Vec::new();
        for s in 0..12 {
            let zone = s / 4;
            let season = if s % 2 == 0 { "dry" } else { "flood" };
            records.push((
                format!("S{}", s + 1),
                vec![zones[zone].to_string(), season.to_string()],
            ));
            let jitter = (s % 4) as u64;
            columns.push(vec![
                50 + 5 * jitter + 200 * zone as u64,
                120 + 3 * jitter,
                80 - 10 * jitter,
                30 + 40 * zone as u64 + jitter,
                60 + 7 * jitter,
            ]);
        }
        let rows: Vec<Vec<u64>> = (0..5)
            .map(|t| columns.iter().map(|c| c[t]).collect())
            .collect();
        let taxon_ids: Vec<String> = (1..=5).map(|i| format!("ASV{}", i)).collect();
        let sample_ids: Vec<String> = records.iter().map(|(id, _)| id.clone()).collect();
        let counts = CountMatrix::from_rows(&rows, taxon_ids, sample_ids).unwrap();
        let metadata = Metadata::from_records(
            vec!["zone".to_string(), "season".to_string()],
            records,
        )
        .unwrap();
        AbundanceTable::from_counts(counts, metadata).unwrap()
    }

    fn quick_config(tests: Vec<TestSpec>) -> BatteryConfig {
        BatteryConfig {
            n_permutations: 199,
            prevalence_threshold: 0.0,
            min_taxa_per_phylum: 0,
            tests,
            ..Default::default()
        }
    }

    #[test]
    fn test_runs_in_configured_order() {
        let tests = vec![
            TestSpec::Permanova {
                design: Design::single(Factor::Zone),
            },
            TestSpec::KruskalWallis {
                metric: AlphaMetric::Shannon,
                factor: Factor::Zone,
            },
            TestSpec::Normality {
                metric: AlphaMetric::Observed,
                factor: Factor::Season,
            },
        ];
        let report = run_battery(&create_test_table(), &quick_config(tests.clone())).unwrap();
        assert_eq!(report.runs.len(), 3);
        for (i, run) in report.runs.iter().enumerate() {
            assert_eq!(run.index, i);
            assert_eq!(run.spec, tests[i]);
            assert_eq!(run.seed, 42 + i as u64);
            assert!(matches!(run.state, TestState::Recorded { .. }));
        }
        match report.runs[0].outcome() {
            Some(TestOutcome::Permanova(p)) => {
                let zone = p.term("zone").unwrap();
                assert!(zone.r_squared > 0.5);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_insufficient_groups_does_not_abort() {
        let fringe = create_test_table()
            .subset_samples(|s| s.get("zone").and_then(|v| v.as_categorical()) == Some("Fringe"))
            .unwrap();
        let tests = vec![
            TestSpec::Dispersion {
                factor: Factor::Zone,
            },
            TestSpec::KruskalWallis {
                metric: AlphaMetric::Shannon,
                factor: Factor::Season,
            },
        ];
        let report = run_battery(&fringe, &quick_config(tests)).unwrap();
        match &report.runs[0].state {
            TestState::Failed { kind, .. } => assert_eq!(kind, "insufficient_groups"),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(report.runs[1].outcome().is_some());
    }

    #[test]
    fn test_missing_contrast_level_fails_per_test() {
        let table = create_test_table();
        let fringe_basin = table
            .subset_samples(|s| {
                s.get("zone").and_then(|v| v.as_categorical()) != Some("Impaired")
            })
            .unwrap();
        let tests = vec![
            TestSpec::DifferentialAbundance {
                contrast: Contrast {
                    factor: Factor::Zone,
                    numerator: "Impaired".to_string(),
                    denominator: "Fringe".to_string(),
                },
            },
            TestSpec::PairwisePermanova {
                factor: Factor::Zone,
            },
        ];
        let report = run_battery(&fringe_basin, &quick_config(tests)).unwrap();
        match &report.runs[0].state {
            TestState::Failed { kind, .. } => assert_eq!(kind, "insufficient_groups"),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(report.runs[1].outcome().is_some());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let tests = vec![
            TestSpec::Permanova {
                design: Design::single(Factor::Zone),
            },
            TestSpec::Dispersion {
                factor: Factor::Zone,
            },
        ];
        let table = create_test_table();
        let mut config = quick_config(tests);
        let parallel = run_battery(&table, &config).unwrap();
        config.parallel = false;
        let sequential = run_battery(&table, &config).unwrap();

        let p = |r: &BatteryReport| match r.runs[0].outcome() {
            Some(TestOutcome::Permanova(p)) => p.term("zone").and_then(|t| t.p_value),
            _ => None,
        };
        assert_eq!(p(&parallel), p(&sequential));
        let d = |r: &BatteryReport| match r.runs[1].outcome() {
            Some(TestOutcome::Dispersion(d)) => d.permutation_p_value,
            _ => None,
        };
        assert_eq!(d(&parallel), d(&sequential));
    }

    #[test]
    fn test_small_groups_not_computable_normality() {
        let tests = vec![TestSpec::Normality {
            metric: AlphaMetric::Shannon,
            factor: Factor::Zone,
        }];
        let table = create_test_table();
        let small = table
            .select_samples(&[0, 1, 4, 5, 6, 7, 8, 9, 10, 11])
            .unwrap();
        let report = run_battery(&small, &quick_config(tests)).unwrap();
        match report.runs[0].outcome() {
            Some(TestOutcome::Normality { groups, .. }) => {
                let fringe = groups.iter().find(|g| g.level == "Fringe").unwrap();
                assert_eq!(fringe.n, 2);
                assert!(!fringe.is_computed());
                assert!(fringe.p_value.is_none());
                let basin = groups.iter().find(|g| g.level == "Basin").unwrap();
                assert!(basin.is_computed());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_empty_filtered_table_fails_every_test() {
        // every taxon is unassigned, so one phylum of 5 < 6 is dropped
        let config = BatteryConfig {
            min_taxa_per_phylum: 6,
            ..quick_config(vec![
                TestSpec::KruskalWallis {
                    metric: AlphaMetric::Shannon,
                    factor: Factor::Zone,
                },
                TestSpec::Permanova {
                    design: Design::single(Factor::Zone),
                },
            ])
        };
        let report = run_battery(&create_test_table(), &config).unwrap();
        assert_eq!(report.filter.taxa_after, 0);
        assert!(report.inputs.is_none());
        assert!(report.ordination.is_none());
        assert_eq!(report.runs.len(), 2);
        for run in &report.runs {
            match &run.state {
                TestState::Failed { kind, .. } => assert_eq!(kind, "estimation_error"),
                other => panic!("expected failure, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_seeds_are_independent_streams() {
        let tests = vec![
            TestSpec::Dispersion {
                factor: Factor::Zone,
            };
            3
        ];
        let report = run_battery(&create_test_table(), &quick_config(tests)).unwrap();
        let seeds: Vec<u64> = report.runs.iter().map(|r| r.seed).collect();
        assert_eq!(seeds[0], test_seed(42, 0));
        assert_ne!(seeds[0], seeds[1]);
        assert_ne!(seeds[1], seeds[2]);
        assert_ne!(test_seed(42, 1), test_seed(43, 0));
    }

    #[test]
    fn test_execute_twice_rejected() {
        let table = create_test_table();
        let config = quick_config(vec![]);
        let report = run_battery(&table, &config).unwrap();
        let mut run = TestRun::new(
            0,
            TestSpec::KruskalWallis {
                metric: AlphaMetric::Shannon,
                factor: Factor::Zone,
            },
            1,
        );
        let inputs = report.inputs.as_ref().unwrap();
        run.execute(inputs, &config).unwrap();
        assert!(matches!(run.state, TestState::Executed { .. }));
        assert!(run.execute(inputs, &config).is_err());
        run.record();
        assert!(matches!(run.state, TestState::Recorded { .. }));
    }
}
