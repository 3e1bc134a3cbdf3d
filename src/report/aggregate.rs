//! One normalized table over every test of a battery run.
//!
//! Fields a test does not produce (R² for rank tests, adjusted p-values for
//! omnibus tests) stay `None` and are written as empty cells.

use crate::data::{cmp_option, DaStatus};
use crate::error::Result;
use crate::pipeline::{BatteryReport, TestOutcome, TestRun, TestSpec, TestState};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// How a row came about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RowStatus {
    Computed,
    NotComputable(String),
    Failed(String),
}

impl RowStatus {
    pub fn name(&self) -> &'static str {
        match self {
            RowStatus::Computed => "computed",
            RowStatus::NotComputable(_) => "not_computable",
            RowStatus::Failed(_) => "failed",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RowStatus::Computed => None,
            RowStatus::NotComputable(r) | RowStatus::Failed(r) => Some(r),
        }
    }
}

/// One line of the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub test: String,
    /// Factor or design, e.g. `zone * season`.
    pub factors: String,
    /// Alpha metric for tests on alpha diversity.
    pub metric: Option<String>,
    /// Model term, level, level pair or taxon.
    pub term: Option<String>,
    /// F, H, W or Wald z.
    pub statistic: Option<f64>,
    /// R² for PERMANOVA rows, signed log2 fold change for differential
    /// abundance.
    pub effect_size: Option<f64>,
    pub p_value: Option<f64>,
    pub p_adjusted: Option<f64>,
    pub status: RowStatus,
}

impl SummaryRow {
    fn new(spec: &TestSpec, term: Option<String>) -> Self {
        Self {
            test: spec.name().to_string(),
            factors: spec.factors(),
            metric: spec.metric().map(|m| m.name().to_string()),
            term,
            statistic: None,
            effect_size: None,
            p_value: None,
            p_adjusted: None,
            status: RowStatus::Computed,
        }
    }

    /// True if `factor` is one of the row's factors.
    pub fn involves(&self, factor: &str) -> bool {
        self.factors
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .any(|t| t == factor)
    }

    /// Value of a numeric column.
    pub fn value(&self, column: Column) -> Option<f64> {
        match column {
            Column::Statistic => self.statistic,
            Column::EffectSize => self.effect_size,
            Column::PValue => self.p_value,
            Column::PAdjusted => self.p_adjusted,
        }
    }
}

/// Numeric columns available for filtering and sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Statistic,
    EffectSize,
    PValue,
    PAdjusted,
}

impl std::str::FromStr for Column {
    type Err = crate::error::AmpliconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "statistic" | "f" => Ok(Column::Statistic),
            "effect_size" | "effect" | "r2" | "r_squared" => Ok(Column::EffectSize),
            "p_value" | "p" => Ok(Column::PValue),
            "p_adjusted" | "padj" => Ok(Column::PAdjusted),
            other => Err(crate::error::AmpliconError::InvalidParameter(format!(
                "unknown column '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// The collected summary. Rows are never modified after collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryTable {
    rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn from_rows(rows: Vec<SummaryRow>) -> Self {
        Self { rows }
    }

    /// Project every test of a battery run, in configured order.
    pub fn from_report(report: &BatteryReport) -> Self {
        Self::from_runs(&report.runs)
    }

    pub fn from_runs(runs: &[TestRun]) -> Self {
        let rows = runs.iter().flat_map(project).collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Start a query over the rows.
    pub fn query(&self) -> Query<'_> {
        Query {
            rows: &self.rows,
            test: None,
            factor: None,
            min_effect: None,
            max_p: None,
            computed_only: false,
            sort: None,
        }
    }

    /// Write CSV with a header row. Absent values are empty cells.
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<()> {
        write_rows(&self.rows, writer)
    }

    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.to_csv_writer(BufWriter::new(file))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.rows)?)
    }
}

/// Pure filter/sort over a [`SummaryTable`].
#[derive(Debug, Clone)]
pub struct Query<'a> {
    rows: &'a [SummaryRow],
    test: Option<String>,
    factor: Option<String>,
    min_effect: Option<f64>,
    max_p: Option<f64>,
    computed_only: bool,
    sort: Option<(Column, Order)>,
}

impl<'a> Query<'a> {
    pub fn test(mut self, name: &str) -> Self {
        self.test = Some(name.to_string());
        self
    }

    pub fn factor(mut self, factor: &str) -> Self {
        self.factor = Some(factor.to_string());
        self
    }

    /// Keep rows whose effect size is at least `min` in magnitude, so a
    /// fold change of -3 passes a threshold of 1; rows without one are
    /// dropped.
    pub fn min_effect(mut self, min: f64) -> Self {
        self.min_effect = Some(min);
        self
    }

    /// Keep rows whose raw p-value is at most `max`.
    pub fn max_p(mut self, max: f64) -> Self {
        self.max_p = Some(max);
        self
    }

    pub fn computed_only(mut self) -> Self {
        self.computed_only = true;
        self
    }

    /// Sort by a numeric column; absent values go last in either order.
    pub fn sort_by(mut self, column: Column, order: Order) -> Self {
        self.sort = Some((column, order));
        self
    }

    pub fn rows(&self) -> Vec<&'a SummaryRow> {
        let mut out: Vec<&SummaryRow> = self
            .rows
            .iter()
            .filter(|r| self.test.as_deref().map_or(true, |t| r.test == t))
            .filter(|r| self.factor.as_deref().map_or(true, |f| r.involves(f)))
            .filter(|r| {
                self.min_effect
                    .map_or(true, |m| r.effect_size.is_some_and(|e| e.abs() >= m))
            })
            .filter(|r| self.max_p.map_or(true, |m| r.p_value.is_some_and(|p| p <= m)))
            .filter(|r| !self.computed_only || r.status == RowStatus::Computed)
            .collect();

        if let Some((column, order)) = self.sort {
            out.sort_by(|a, b| {
                let (x, y) = (a.value(column), b.value(column));
                match order {
                    Order::Ascending => cmp_option(x, y),
                    Order::Descending => cmp_option(x.map(|v| -v), y.map(|v| -v)),
                }
            });
        }
        out
    }

    /// Collect the selected rows into a new table.
    pub fn collect(&self) -> SummaryTable {
        SummaryTable::from_rows(self.rows().into_iter().cloned().collect())
    }
}

const HEADER: [&str; 10] = [
    "test",
    "factors",
    "metric",
    "term",
    "statistic",
    "effect_size",
    "p_value",
    "p_adjusted",
    "status",
    "reason",
];

fn write_rows<'a, I, W>(rows: I, writer: W) -> Result<()>
where
    I: IntoIterator<Item = &'a SummaryRow>,
    W: Write,
{
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(HEADER)?;
    for r in rows {
        csv.write_record([
            r.test.clone(),
            r.factors.clone(),
            r.metric.clone().unwrap_or_default(),
            r.term.clone().unwrap_or_default(),
            cell(r.statistic),
            cell(r.effect_size),
            cell(r.p_value),
            cell(r.p_adjusted),
            r.status.name().to_string(),
            r.status.reason().unwrap_or_default().to_string(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

fn cell(v: Option<f64>) -> String {
    v.map(|x| format!("{}", x)).unwrap_or_default()
}

fn project(run: &TestRun) -> Vec<SummaryRow> {
    let spec = &run.spec;
    let outcome = match &run.state {
        TestState::Executed { outcome } | TestState::Recorded { outcome } => outcome,
        TestState::Failed { reason, .. } => {
            let mut row = SummaryRow::new(spec, None);
            row.status = RowStatus::Failed(reason.clone());
            return vec![row];
        }
        TestState::Configured => return Vec::new(),
    };

    match outcome.as_ref() {
        TestOutcome::Normality { groups, .. } => groups
            .iter()
            .map(|g| {
                let mut row = SummaryRow::new(spec, Some(g.level.clone()));
                row.statistic = g.w;
                row.p_value = g.p_value;
                if let Some(reason) = &g.reason {
                    row.status = RowStatus::NotComputable(reason.clone());
                }
                row
            })
            .collect(),
        TestOutcome::Permanova(p) => p
            .terms()
            .map(|r| {
                let mut row = SummaryRow::new(spec, Some(r.term.clone()));
                row.statistic = r.f_statistic;
                row.effect_size = Some(r.r_squared);
                row.p_value = r.p_value;
                row
            })
            .collect(),
        TestOutcome::PairwisePermanova(p) => p
            .rows
            .iter()
            .map(|r| {
                let mut row =
                    SummaryRow::new(spec, Some(format!("{} vs {}", r.level_a, r.level_b)));
                row.statistic = r.f_statistic;
                row.effect_size = r.r_squared;
                row.p_value = r.p_value;
                row.p_adjusted = r.p_adjusted;
                if let Some(e) = &r.error {
                    row.status = RowStatus::NotComputable(e.clone());
                }
                row
            })
            .collect(),
        TestOutcome::Dispersion(d) => {
            let mut row = SummaryRow::new(spec, None);
            row.statistic = Some(d.f_statistic);
            row.p_value = Some(d.permutation_p_value.unwrap_or(d.p_value));
            vec![row]
        }
        TestOutcome::KruskalWallis { result, .. } => {
            let mut row = SummaryRow::new(spec, None);
            row.statistic = Some(result.statistic);
            row.p_value = Some(result.p_value);
            vec![row]
        }
        TestOutcome::PairwiseWilcoxon { result, .. } => result
            .rows
            .iter()
            .map(|r| {
                let mut row =
                    SummaryRow::new(spec, Some(format!("{} vs {}", r.level_a, r.level_b)));
                row.statistic = r.statistic;
                row.p_value = r.p_value;
                row.p_adjusted = r.p_adjusted;
                if let Some(e) = &r.error {
                    row.status = RowStatus::NotComputable(e.clone());
                }
                row
            })
            .collect(),
        TestOutcome::DifferentialAbundance(set) => set
            .results
            .iter()
            .map(|r| {
                let mut row = SummaryRow::new(spec, Some(r.taxon_id.clone()));
                row.statistic = r.statistic;
                row.effect_size = r.log2_fold_change;
                row.p_value = r.p_value;
                row.p_adjusted = r.p_adjusted;
                if let DaStatus::NotComputable(reason) = &r.status {
                    row.status = RowStatus::NotComputable(reason.clone());
                }
                row
            })
            .collect(),
    }
}
