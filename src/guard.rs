//! Completion marker and the guard that decides whether a run can be skipped
//!
//! The marker records the allowed thresholds of a finished cascade together
//! with the exact id set it ran over. A later run over the same ids (and the
//! same tolerance label) reloads it instead of filtering again.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{QcError, QcResult};
use crate::filter_engine::Allowed;
use crate::persist::write_atomic;
use crate::stats_table::StatsTable;
use crate::tolerance::Criterion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub label: String,
    pub allowed: BTreeMap<Criterion, Allowed>,
    pub ids: BTreeSet<String>,
    pub completed_at: DateTime<Utc>,
}

impl CompletionMarker {
    pub fn new(label: &str, allowed: BTreeMap<Criterion, Allowed>, table: &StatsTable) -> Self {
        CompletionMarker {
            label: label.to_string(),
            allowed,
            ids: table.id_set(),
            completed_at: Utc::now(),
        }
    }

    /// Whether this marker was computed over exactly the ids in `table`
    pub fn covers(&self, table: &StatsTable) -> bool {
        self.ids.len() == table.len() && table.ids().all(|id| self.ids.contains(id))
    }
}

/// Why a run has to go ahead
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    NoStatsTable,
    NoMarker,
    LabelMismatch { recorded: String },
    IdsChanged { recorded: usize, current: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    Complete(CompletionMarker),
    Stale(StaleReason),
}

/// Load / compare / commit of the completion marker for one label
#[derive(Debug, Clone)]
pub struct CompletionGuard {
    marker_path: PathBuf,
    label: String,
}

impl CompletionGuard {
    pub fn new<P: Into<PathBuf>>(marker_path: P, label: &str) -> Self {
        CompletionGuard {
            marker_path: marker_path.into(),
            label: label.to_string(),
        }
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    /// Read the persisted marker, if any
    pub fn load(&self) -> QcResult<Option<CompletionMarker>> {
        if !self.marker_path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.marker_path)
            .map_err(|e| QcError::persistence(&self.marker_path, e))?;
        let marker = serde_json::from_str(&data)
            .map_err(|e| QcError::persistence(&self.marker_path, e))?;
        Ok(Some(marker))
    }

    /// Pure staleness comparison
    pub fn compare(
        &self,
        marker: Option<CompletionMarker>,
        table: Option<&StatsTable>,
    ) -> GuardDecision {
        let Some(table) = table else {
            return GuardDecision::Stale(StaleReason::NoStatsTable);
        };
        let Some(marker) = marker else {
            return GuardDecision::Stale(StaleReason::NoMarker);
        };
        if marker.label != self.label {
            return GuardDecision::Stale(StaleReason::LabelMismatch {
                recorded: marker.label,
            });
        }
        if !marker.covers(table) {
            return GuardDecision::Stale(StaleReason::IdsChanged {
                recorded: marker.ids.len(),
                current: table.len(),
            });
        }
        GuardDecision::Complete(marker)
    }

    /// `load` followed by `compare`
    pub fn check(&self, table: Option<&StatsTable>) -> QcResult<GuardDecision> {
        let decision = self.compare(self.load()?, table);
        debug!("{}: {:?}", self.marker_path.display(), decision);
        Ok(decision)
    }

    /// Persist the marker; the last write of a successful run
    pub fn commit(&self, marker: &CompletionMarker) -> QcResult<()> {
        let path = &self.marker_path;
        write_atomic(path, |w| {
            serde_json::to_writer_pretty(&mut *w, marker).map_err(|e| QcError::persistence(path, e))?;
            w.write_all(b"\n").map_err(|e| QcError::persistence(path, e))
        })
    }
}
