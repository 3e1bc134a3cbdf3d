//! Typed model designs: a set of factors plus an interaction structure.

use crate::data::covariates::Factor;
use crate::error::{AmpliconError, Result};
use serde::{Deserialize, Serialize};

/// Which interactions between the design's factors are included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interaction {
    /// Main effects only (`a + b + c`).
    #[default]
    None,
    /// Main effects and all two-way interactions (`(a + b + c)^2`).
    Pairwise,
    /// Every interaction up to the full order (`a * b * c`).
    Full,
}

/// A model term: one factor (main effect) or several (interaction).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    factors: Vec<Factor>,
}

impl Term {
    pub fn main(factor: Factor) -> Self {
        Self {
            factors: vec![factor],
        }
    }

    pub fn interaction(factors: Vec<Factor>) -> Self {
        Self { factors }
    }

    /// Factors in this term.
    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    /// 1 for a main effect, 2 for a two-way interaction, ...
    pub fn order(&self) -> usize {
        self.factors.len()
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.factors.iter().map(|f| f.column()).collect();
        write!(f, "{}", names.join(":"))
    }
}

/// A design over one or more grouping factors.
///
/// Terms are generated by dispatch on [`Interaction`]: main effects in
/// factor order, then interactions by increasing order, each order in
/// lexicographic combination order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Design {
    pub factors: Vec<Factor>,
    #[serde(default)]
    pub interaction: Interaction,
}

impl Design {
    pub fn new(factors: Vec<Factor>, interaction: Interaction) -> Result<Self> {
        if factors.is_empty() {
            return Err(AmpliconError::InvalidParameter(
                "design must name at least one factor".to_string(),
            ));
        }
        for (i, f) in factors.iter().enumerate() {
            if factors[..i].contains(f) {
                return Err(AmpliconError::InvalidParameter(format!(
                    "factor '{}' repeated in design",
                    f
                )));
            }
        }
        Ok(Self {
            factors,
            interaction,
        })
    }

    /// One-factor design.
    pub fn single(factor: Factor) -> Self {
        Self {
            factors: vec![factor],
            interaction: Interaction::None,
        }
    }

    /// Parse `a + b`, `a * b * c` or `(a + b + c)^2`. A leading `~` is allowed.
    pub fn parse(formula: &str) -> Result<Self> {
        let rhs = formula.trim().trim_start_matches('~').trim();
        if rhs.is_empty() {
            return Err(AmpliconError::InvalidParameter(
                "empty design formula".to_string(),
            ));
        }

        let (body, interaction) = if let Some(inner) = rhs.strip_suffix("^2") {
            let inner = inner.trim();
            let inner = inner
                .strip_prefix('(')
                .and_then(|s| s.strip_suffix(')'))
                .ok_or_else(|| {
                    AmpliconError::InvalidParameter(format!("expected '(...)^2' in '{}'", formula))
                })?;
            (inner, Interaction::Pairwise)
        } else if rhs.contains('*') {
            if rhs.contains('+') {
                return Err(AmpliconError::InvalidParameter(format!(
                    "cannot mix '+' and '*' in '{}'",
                    formula
                )));
            }
            (rhs, Interaction::Full)
        } else {
            (rhs, Interaction::None)
        };

        let sep = if interaction == Interaction::Full { '*' } else { '+' };
        let factors = body
            .split(sep)
            .map(|s| s.trim().parse::<Factor>())
            .collect::<Result<Vec<_>>>()?;
        Self::new(factors, interaction)
    }

    /// Highest interaction order included.
    pub fn max_order(&self) -> usize {
        match self.interaction {
            Interaction::None => 1,
            Interaction::Pairwise => 2.min(self.factors.len()),
            Interaction::Full => self.factors.len(),
        }
    }

    /// Ordered model terms.
    pub fn terms(&self) -> Vec<Term> {
        let mut terms = Vec::new();
        for order in 1..=self.max_order() {
            for combo in combinations(self.factors.len(), order) {
                terms.push(Term::interaction(
                    combo.into_iter().map(|i| self.factors[i]).collect(),
                ));
            }
        }
        terms
    }
}

impl std::fmt::Display for Design {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.factors.iter().map(|f| f.column()).collect();
        match self.interaction {
            Interaction::None => write!(f, "{}", names.join(" + ")),
            Interaction::Pairwise if names.len() > 2 => write!(f, "({})^2", names.join(" + ")),
            _ => write!(f, "{}", names.join(" * ")),
        }
    }
}

/// k-subsets of 0..n in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || k > n {
        return out;
    }
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.clone());
        let mut i = k;
        while i > 0 && idx[i - 1] == n - k + i - 1 {
            i -= 1;
        }
        if i == 0 {
            break;
        }
        idx[i - 1] += 1;
        for j in i..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
    out
}
