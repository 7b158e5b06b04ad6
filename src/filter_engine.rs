//! The four-step filter cascade
//!
//! Each step consumes the set of genomes left by its predecessor:
//!
//! 1. unknown bases: fixed threshold, never skipped
//! 2. contigs: two-sided MAD over genomes with more than
//!    [`CONTIG_ELIGIBILITY`] contigs; the rest are exempt
//! 3. assembly size: two-sided MAD range
//! 4. distance: one-sided (upper) MAD
//!
//! Steps 2-4 are skipped when [`MIN_PASSED`] or fewer genomes remain.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::{QcError, QcResult};
use crate::stats::Deviation;
use crate::stats_table::{GenomeRecord, StatsTable};
use crate::tolerance::{Criterion, ToleranceConfig};

/// Statistical steps need more than this many genomes
pub const MIN_PASSED: usize = 5;

/// Genomes with this many contigs or fewer are exempt from the contig test
pub const CONTIG_ELIGIBILITY: u64 = 10;

/// Decimal places used when reporting the distance bound
pub const DISTANCE_DECIMALS: usize = 4;

/// Threshold that defined the pass/fail boundary for one criterion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Allowed {
    /// Criterion was skipped
    Unset,
    Limit { value: u64 },
    /// Upper figure, optionally rounded when displayed
    Upper { value: f64, decimals: Option<usize> },
    /// Displayed as integers joined by a hyphen
    Range { lower: f64, upper: f64 },
}

impl fmt::Display for Allowed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allowed::Unset => Ok(()),
            Allowed::Limit { value } => write!(f, "{value}"),
            Allowed::Upper {
                value,
                decimals: Some(d),
            } => write!(f, "{value:.d$}"),
            Allowed::Upper {
                value,
                decimals: None,
            } => write!(f, "{value:?}"),
            Allowed::Range { lower, upper } => {
                write!(f, "{}-{}", lower.trunc() as i64, upper.trunc() as i64)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TooFewPassed { count: usize },
    NoEligibleContigs,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooFewPassed { count } => {
                write!(f, "only {count} genomes left (need more than {MIN_PASSED})")
            }
            SkipReason::NoEligibleContigs => write!(
                f,
                "no genome has more than {CONTIG_ELIGIBILITY} contigs"
            ),
        }
    }
}

/// Result of one step
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied { failed: Vec<String>, allowed: Allowed },
    Skipped { reason: SkipReason },
}

impl Outcome {
    pub fn failed(&self) -> &[String] {
        match self {
            Outcome::Applied { failed, .. } => failed,
            Outcome::Skipped { .. } => &[],
        }
    }

    pub fn allowed(&self) -> &Allowed {
        match self {
            Outcome::Applied { allowed, .. } => allowed,
            Outcome::Skipped { .. } => &Allowed::Unset,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub criterion: Criterion,
    /// Size of the passed set entering this step
    pub entered: usize,
    pub outcome: Outcome,
}

impl Step {
    pub fn survivors(&self) -> usize {
        self.entered - self.outcome.failed().len()
    }
}

/// Partition produced by a cascade run
#[derive(Debug, Clone, PartialEq)]
pub struct FilterReport {
    steps: Vec<Step>,
    passed: Vec<String>,
}

impl FilterReport {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Ids surviving every step, in table order
    pub fn passed(&self) -> &[String] {
        &self.passed
    }

    pub fn outcome(&self, criterion: Criterion) -> Option<&Outcome> {
        self.steps
            .iter()
            .find(|s| s.criterion == criterion)
            .map(|s| &s.outcome)
    }

    pub fn failed(&self, criterion: Criterion) -> &[String] {
        self.outcome(criterion).map(Outcome::failed).unwrap_or(&[])
    }

    pub fn allowed(&self) -> BTreeMap<Criterion, Allowed> {
        self.steps
            .iter()
            .map(|s| (s.criterion, s.outcome.allowed().clone()))
            .collect()
    }
}

/// Runs the cascade over a stats table
#[derive(Debug, Clone)]
pub struct FilterEngine {
    config: ToleranceConfig,
}

impl FilterEngine {
    pub fn new(config: ToleranceConfig) -> Self {
        FilterEngine { config }
    }

    pub fn config(&self) -> &ToleranceConfig {
        &self.config
    }

    pub fn run(&self, table: &StatsTable) -> QcResult<FilterReport> {
        if table.is_empty() {
            return Err(QcError::MalformedInput(
                "cannot filter an empty stats table".into(),
            ));
        }

        let mut passed: Vec<&GenomeRecord> = table.records().collect();
        let mut steps = Vec::with_capacity(Criterion::ALL.len());

        for criterion in Criterion::ALL {
            let entered = passed.len();
            let (survivors, outcome) = self.apply(criterion, &passed)?;
            check_step(criterion, &passed, &survivors, &outcome)?;

            match &outcome {
                Outcome::Applied { failed, allowed } => debug!(
                    "{criterion}: {entered} in, {} failed, allowed {allowed}",
                    failed.len()
                ),
                Outcome::Skipped { reason } => debug!("{criterion}: skipped, {reason}"),
            }

            steps.push(Step {
                criterion,
                entered,
                outcome,
            });
            passed = survivors;
        }

        Ok(FilterReport {
            steps,
            passed: passed.iter().map(|r| r.id.clone()).collect(),
        })
    }

    fn apply<'a>(
        &self,
        criterion: Criterion,
        passed: &[&'a GenomeRecord],
    ) -> QcResult<(Vec<&'a GenomeRecord>, Outcome)> {
        if criterion == Criterion::Unknowns {
            return Ok(self.filter_unknowns(passed));
        }
        if passed.len() <= MIN_PASSED {
            let reason = SkipReason::TooFewPassed {
                count: passed.len(),
            };
            return Ok((passed.to_vec(), Outcome::Skipped { reason }));
        }
        match criterion {
            Criterion::Contigs => Ok(self.filter_contigs(passed)),
            Criterion::AssemblySize => self.filter_range(criterion, passed),
            _ => self.filter_upper(criterion, passed),
        }
    }

    fn filter_unknowns<'a>(
        &self,
        passed: &[&'a GenomeRecord],
    ) -> (Vec<&'a GenomeRecord>, Outcome) {
        let limit = self.config.max_unknowns;
        let (failed, survivors): (Vec<&GenomeRecord>, Vec<&GenomeRecord>) =
            passed.iter().copied().partition(|r| r.unknown_bases > limit);
        let outcome = Outcome::Applied {
            failed: ids(&failed),
            allowed: Allowed::Limit { value: limit },
        };
        (survivors, outcome)
    }

    /// Low contig counts say nothing about outliers and would drag the
    /// median down, so they are kept without being tested.
    fn filter_contigs<'a>(
        &self,
        passed: &[&'a GenomeRecord],
    ) -> (Vec<&'a GenomeRecord>, Outcome) {
        let eligible: Vec<&GenomeRecord> = passed
            .iter()
            .copied()
            .filter(|r| r.contigs > CONTIG_ELIGIBILITY)
            .collect();
        let values: Vec<f64> = eligible.iter().map(|r| r.contigs as f64).collect();

        let Some(dev) = Deviation::compute(&values, self.config.contigs_multiplier) else {
            let reason = SkipReason::NoEligibleContigs;
            return (passed.to_vec(), Outcome::Skipped { reason });
        };

        let failed: HashSet<&str> = eligible
            .iter()
            .filter(|r| dev.is_outlier(r.contigs as f64))
            .map(|r| r.id.as_str())
            .collect();
        let (failed, survivors): (Vec<&GenomeRecord>, Vec<&GenomeRecord>) =
            passed.iter().copied().partition(|r| failed.contains(r.id.as_str()));

        // Reported as one upper figure although the test is two-sided
        let outcome = Outcome::Applied {
            failed: ids(&failed),
            allowed: Allowed::Upper {
                value: dev.upper(),
                decimals: None,
            },
        };
        (survivors, outcome)
    }

    fn filter_range<'a>(
        &self,
        criterion: Criterion,
        passed: &[&'a GenomeRecord],
    ) -> QcResult<(Vec<&'a GenomeRecord>, Outcome)> {
        let dev = self.deviation(criterion, passed)?;
        let (failed, survivors): (Vec<&GenomeRecord>, Vec<&GenomeRecord>) = passed
            .iter()
            .copied()
            .partition(|r| dev.is_outlier(r.value(criterion)));
        let outcome = Outcome::Applied {
            failed: ids(&failed),
            allowed: Allowed::Range {
                lower: dev.lower(),
                upper: dev.upper(),
            },
        };
        Ok((survivors, outcome))
    }

    fn filter_upper<'a>(
        &self,
        criterion: Criterion,
        passed: &[&'a GenomeRecord],
    ) -> QcResult<(Vec<&'a GenomeRecord>, Outcome)> {
        let dev = self.deviation(criterion, passed)?;
        let upper = dev.upper();
        let (failed, survivors): (Vec<&GenomeRecord>, Vec<&GenomeRecord>) =
            passed.iter().copied().partition(|r| r.value(criterion) > upper);
        let outcome = Outcome::Applied {
            failed: ids(&failed),
            allowed: Allowed::Upper {
                value: upper,
                decimals: Some(DISTANCE_DECIMALS),
            },
        };
        Ok((survivors, outcome))
    }

    fn deviation(&self, criterion: Criterion, passed: &[&GenomeRecord]) -> QcResult<Deviation> {
        let multiplier = self.config.multiplier(criterion).ok_or_else(|| {
            QcError::ConsistencyViolation(format!("{criterion}: no deviation multiplier"))
        })?;
        let values: Vec<f64> = passed.iter().map(|r| r.value(criterion)).collect();
        Deviation::compute(&values, multiplier).ok_or_else(|| {
            QcError::ConsistencyViolation(format!("{criterion}: deviation over no genomes"))
        })
    }
}

fn ids(records: &[&GenomeRecord]) -> Vec<String> {
    records.iter().map(|r| r.id.clone()).collect()
}

/// passed_before must equal passed_after plus failed, with no overlap
fn check_step(
    criterion: Criterion,
    before: &[&GenomeRecord],
    after: &[&GenomeRecord],
    outcome: &Outcome,
) -> QcResult<()> {
    let failed = outcome.failed();
    let mut seen: HashSet<&str> = HashSet::with_capacity(before.len());
    for id in after.iter().map(|r| r.id.as_str()).chain(failed.iter().map(String::as_str)) {
        if !seen.insert(id) {
            return Err(QcError::ConsistencyViolation(format!(
                "{criterion}: genome '{id}' is both kept and failed"
            )));
        }
    }
    let entered: HashSet<&str> = before.iter().map(|r| r.id.as_str()).collect();
    if seen != entered {
        return Err(QcError::ConsistencyViolation(format!(
            "{criterion}: {} genomes entered but {} were accounted for",
            entered.len(),
            seen.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genome(id: &str, unknowns: u64, contigs: u64, size: u64, distance: f64) -> GenomeRecord {
        GenomeRecord {
            id: id.to_string(),
            unknown_bases: unknowns,
            contigs,
            assembly_size: size,
            distance,
        }
    }

    fn uniform(n: usize) -> Vec<GenomeRecord> {
        (0..n)
            .map(|i| genome(&format!("g{i}"), 0, 50, 5_000_000, 0.01))
            .collect()
    }

    fn run(records: Vec<GenomeRecord>) -> FilterReport {
        let table = StatsTable::from_records(records).unwrap();
        FilterEngine::new(ToleranceConfig::default())
            .run(&table)
            .unwrap()
    }

    #[test]
    fn test_unknowns_boundary() {
        let mut records = uniform(8);
        records[0].unknown_bases = 200;
        records[1].unknown_bases = 201;
        let report = run(records);
        assert_eq!(report.failed(Criterion::Unknowns), ["g1".to_string()]);
        assert_eq!(
            report.outcome(Criterion::Unknowns).unwrap().allowed(),
            &Allowed::Limit { value: 200 }
        );
    }

    #[test]
    fn test_unknowns_runs_on_tiny_groups() {
        let mut records = uniform(2);
        records[0].unknown_bases = 1_000;
        let report = run(records);
        assert_eq!(report.failed(Criterion::Unknowns).len(), 1);
        for c in &Criterion::ALL[1..] {
            assert!(report.outcome(*c).unwrap().is_skipped());
        }
        assert_eq!(report.passed(), ["g1".to_string()]);
    }

    #[test]
    fn test_contig_outlier_and_exemption() {
        let mut records = uniform(8);
        records[0].contigs = 2; // exempt however extreme
        records[1].contigs = 5_000;
        let report = run(records);
        assert_eq!(report.failed(Criterion::Contigs), ["g1".to_string()]);
        assert!(report.passed().contains(&"g0".to_string()));
    }

    #[test]
    fn test_contig_allowed_is_upper_figure() {
        // eligible contigs: 20, 20, 20, 20, 20, 30 -> median 20, MAD 10/6
        let mut records = uniform(6);
        for r in records.iter_mut() {
            r.contigs = 20;
        }
        records[5].contigs = 30;
        let report = run(records);
        let allowed = report.outcome(Criterion::Contigs).unwrap().allowed().clone();
        let Allowed::Upper { value, decimals } = allowed else {
            panic!("expected upper bound, got {allowed:?}");
        };
        assert_eq!(decimals, None);
        assert!((value - (20.0 + 5.0)).abs() < 1e-9);
        // 30 is 10 away from the median, dev_ref is 5
        assert_eq!(report.failed(Criterion::Contigs), ["g5".to_string()]);
    }

    #[test]
    fn test_no_eligible_contigs_skips_without_failing() {
        let mut records = uniform(20);
        for r in records.iter_mut() {
            r.contigs = 5;
        }
        let report = run(records);
        assert_eq!(
            report.outcome(Criterion::Contigs).unwrap(),
            &Outcome::Skipped {
                reason: SkipReason::NoEligibleContigs
            }
        );
        assert_eq!(report.steps()[1].survivors(), 20);
    }

    #[test]
    fn test_assembly_size_range() {
        let sizes = [100, 100, 100, 100, 100, 100, 100, 1_000];
        let records: Vec<_> = sizes
            .iter()
            .enumerate()
            .map(|(i, &s)| genome(&format!("g{i}"), 0, 5, s, 0.01))
            .collect();
        let report = run(records);
        assert_eq!(report.failed(Criterion::AssemblySize), ["g7".to_string()]);
        // median 100, MAD 900/8 = 112.5, dev_ref 337.5
        assert_eq!(
            report
                .outcome(Criterion::AssemblySize)
                .unwrap()
                .allowed()
                .to_string(),
            "-237-437"
        );
    }

    #[test]
    fn test_distance_is_one_sided() {
        let distances = [0.02, 0.02, 0.02, 0.02, 0.02, 0.02, 0.0, 0.5];
        let records: Vec<_> = distances
            .iter()
            .enumerate()
            .map(|(i, &d)| genome(&format!("g{i}"), 0, 5, 1_000, d))
            .collect();
        let report = run(records);
        // The unusually close genome is kept, only the distant one fails
        assert_eq!(report.failed(Criterion::Distance), ["g7".to_string()]);
        let shown = report
            .outcome(Criterion::Distance)
            .unwrap()
            .allowed()
            .to_string();
        assert_eq!(shown.split('.').nth(1).map(str::len), Some(4));
    }

    #[test]
    fn test_small_sample_skip_before_assembly_size() {
        let mut records = uniform(8);
        for r in records.iter_mut().take(3) {
            r.unknown_bases = 999;
        }
        records[7].assembly_size = 50_000_000;
        let report = run(records);
        let outcome = report.outcome(Criterion::AssemblySize).unwrap();
        assert_eq!(
            outcome,
            &Outcome::Skipped {
                reason: SkipReason::TooFewPassed { count: 5 }
            }
        );
        assert_eq!(outcome.allowed(), &Allowed::Unset);
        assert_eq!(outcome.allowed().to_string(), "");
        assert_eq!(report.passed().len(), 5);
    }

    #[test]
    fn test_empty_table_is_malformed() {
        let table = StatsTable::default();
        let err = FilterEngine::new(ToleranceConfig::default())
            .run(&table)
            .unwrap_err();
        assert!(matches!(err, QcError::MalformedInput(_)));
    }

    #[test]
    fn test_allowed_display() {
        assert_eq!(
            Allowed::Range {
                lower: 4_100_000.9,
                upper: 5_900_000.2
            }
            .to_string(),
            "4100000-5900000"
        );
        assert_eq!(
            Allowed::Upper {
                value: 0.012345,
                decimals: Some(4)
            }
            .to_string(),
            "0.0123"
        );
        assert_eq!(
            Allowed::Upper {
                value: 125.0,
                decimals: None
            }
            .to_string(),
            "125.0"
        );
    }

    #[test]
    fn test_deviation_requires_data_and_multiplier() {
        let engine = FilterEngine::new(ToleranceConfig::default());
        let records = uniform(6);
        let passed: Vec<&GenomeRecord> = records.iter().collect();

        assert!(matches!(
            engine.deviation(Criterion::Distance, &[]),
            Err(QcError::ConsistencyViolation(_))
        ));
        assert!(matches!(
            engine.deviation(Criterion::Unknowns, &passed),
            Err(QcError::ConsistencyViolation(_))
        ));
        let dev = engine.deviation(Criterion::AssemblySize, &passed).unwrap();
        assert_eq!(dev.median, 5_000_000.0);
        assert_eq!(dev.dev_ref, 0.0);
    }

    #[test]
    fn test_check_step_detects_overlap() {
        let a = genome("a", 0, 1, 1, 0.0);
        let b = genome("b", 0, 1, 1, 0.0);
        let before = vec![&a, &b];
        let after = vec![&a, &b];
        let outcome = Outcome::Applied {
            failed: vec!["a".into()],
            allowed: Allowed::Unset,
        };
        let err = check_step(Criterion::Contigs, &before, &after, &outcome).unwrap_err();
        assert!(matches!(err, QcError::ConsistencyViolation(_)));
    }
}
