/// Human-readable per-criterion summary of a run
use std::collections::BTreeMap;
use std::fmt;

use crate::filter_engine::Allowed;
use crate::ledger::FailureLedger;
use crate::tolerance::{Criterion, ToleranceConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct CriterionSummary {
    pub criterion: Criterion,
    pub allowed: Allowed,
    pub tolerance: String,
    pub filtered: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub species: String,
    pub rows: Vec<CriterionSummary>,
}

impl Summary {
    pub fn new(
        species: &str,
        config: &ToleranceConfig,
        allowed: &BTreeMap<Criterion, Allowed>,
        ledger: &FailureLedger,
    ) -> Self {
        let rows = Criterion::ALL
            .iter()
            .map(|&criterion| CriterionSummary {
                criterion,
                allowed: allowed.get(&criterion).cloned().unwrap_or(Allowed::Unset),
                tolerance: config.tolerance(criterion),
                filtered: ledger.count(criterion),
            })
            .collect();
        Summary {
            species: species.to_string(),
            rows,
        }
    }

    pub fn filtered_total(&self) -> usize {
        self.rows.iter().map(|r| r.filtered).sum()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.species)?;
        for row in &self.rows {
            writeln!(f)?;
            writeln!(f, "{}", row.criterion.title())?;
            writeln!(f, "Allowed: {}", row.allowed)?;
            writeln!(f, "Tolerance: {}", row.tolerance)?;
            writeln!(f, "Filtered: {}", row.filtered)?;
        }
        Ok(())
    }
}
