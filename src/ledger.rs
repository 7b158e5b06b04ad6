/// Failure ledger: which criterion removed each failed genome
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::Path;

use crate::error::{QcError, QcResult};
use crate::filter_engine::FilterReport;
use crate::persist::write_atomic;
use crate::stats_table::StatsTable;
use crate::tolerance::Criterion;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureLedger {
    entries: IndexMap<String, Criterion>,
}

impl FailureLedger {
    /// Invert per-criterion failed sets; an id failing twice is an engine bug
    pub fn from_failed<'a, I>(failed: I) -> QcResult<Self>
    where
        I: IntoIterator<Item = (Criterion, &'a [String])>,
    {
        let mut entries = IndexMap::new();
        for (criterion, ids) in failed {
            for id in ids {
                if let Some(previous) = entries.insert(id.clone(), criterion) {
                    return Err(QcError::ConsistencyViolation(format!(
                        "genome '{id}' failed both {previous} and {criterion}"
                    )));
                }
            }
        }
        Ok(FailureLedger { entries })
    }

    /// Build from a cascade run and verify it partitions `table` with the
    /// passed set
    pub fn from_report(report: &FilterReport, table: &StatsTable) -> QcResult<Self> {
        let ledger = Self::from_failed(
            report
                .steps()
                .iter()
                .map(|s| (s.criterion, s.outcome.failed())),
        )?;
        ledger.verify_partition(report.passed(), table)?;
        Ok(ledger)
    }

    /// Every id of `table` must be either passed or failed, exactly once
    pub fn verify_partition(&self, passed: &[String], table: &StatsTable) -> QcResult<()> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(table.len());
        for id in passed.iter().chain(self.entries.keys()) {
            if !seen.insert(id.as_str()) {
                return Err(QcError::ConsistencyViolation(format!(
                    "genome '{id}' is both passed and failed"
                )));
            }
            if table.get(id).is_none() {
                return Err(QcError::ConsistencyViolation(format!(
                    "genome '{id}' is not in the stats table"
                )));
            }
        }
        if seen.len() != table.len() {
            return Err(QcError::ConsistencyViolation(format!(
                "{} of {} genomes were neither passed nor failed",
                table.len() - seen.len(),
                table.len()
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Criterion> {
        self.entries.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Criterion)> {
        self.entries.iter().map(|(id, c)| (id.as_str(), *c))
    }

    pub fn failed(&self, criterion: Criterion) -> Vec<&str> {
        self.iter()
            .filter(|(_, c)| *c == criterion)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn count(&self, criterion: Criterion) -> usize {
        self.entries.values().filter(|c| **c == criterion).count()
    }

    /// Ids of `table` not named in the ledger, in table order
    pub fn passed<'t>(&self, table: &'t StatsTable) -> Vec<&'t str> {
        table
            .ids()
            .filter(|id| !self.entries.contains_key(*id))
            .collect()
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> QcResult<()> {
        let path = path.as_ref();
        write_atomic(path, |w| {
            let mut writer = csv::Writer::from_writer(w);
            writer
                .write_record(["id", "criterion"])
                .map_err(|e| QcError::persistence(path, e))?;
            for (id, criterion) in self.iter() {
                writer
                    .write_record([id, criterion.as_str()])
                    .map_err(|e| QcError::persistence(path, e))?;
            }
            writer.flush().map_err(|e| QcError::persistence(path, e))
        })
    }

    pub fn read_csv<P: AsRef<Path>>(path: P) -> QcResult<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path).map_err(|e| QcError::persistence(path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| QcError::persistence(path, e))?
            .clone();
        // Older reports call the column "criteria"
        let col = headers
            .iter()
            .position(|h| h == "criterion" || h == "criteria")
            .ok_or_else(|| {
                QcError::MalformedInput(format!("{}: no criterion column", path.display()))
            })?;

        let mut entries = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| QcError::persistence(path, e))?;
            let id = record.get(0).unwrap_or("").to_string();
            let criterion = record
                .get(col)
                .unwrap_or("")
                .parse::<Criterion>()
                .map_err(|e| QcError::MalformedInput(format!("{}: {e}", path.display())))?;
            entries.push((criterion, id));
        }

        let mut ledger = FailureLedger::default();
        for (criterion, id) in entries {
            if ledger.entries.insert(id.clone(), criterion).is_some() {
                return Err(QcError::MalformedInput(format!(
                    "{}: genome '{id}' listed twice",
                    path.display()
                )));
            }
        }
        Ok(ledger)
    }
}
