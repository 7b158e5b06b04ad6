//! Quality control over every species directory below a root
//!
//! Species are independent: each one writes only under its own `qc/`
//! directory, so they run in parallel and a failure in one is recorded
//! without stopping the others.

use anyhow::{Context, Result};
use log::{error, info};
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::QcError;
use crate::genome::genome_id;
use crate::species::{QcOptions, Species, SpeciesOutcome};

/// What happened to one species directory
#[derive(Debug, Clone, PartialEq)]
pub enum GroupStatus {
    TooFewGenomes {
        count: usize,
    },
    Completed {
        passed: usize,
        failed: usize,
        reused: bool,
    },
    Failed {
        kind: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupReport {
    pub name: String,
    pub path: PathBuf,
    pub status: GroupStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub groups: Vec<GroupReport>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, GroupStatus::Completed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, GroupStatus::TooFewGenomes { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, GroupStatus::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    fn count(&self, pred: impl Fn(&GroupStatus) -> bool) -> usize {
        self.groups.iter().filter(|g| pred(&g.status)).count()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for group in &self.groups {
            match &group.status {
                GroupStatus::TooFewGenomes { count } => {
                    writeln!(f, "{}\tskipped\t{count} genomes", group.name)?
                }
                GroupStatus::Completed {
                    passed,
                    failed,
                    reused,
                } => writeln!(
                    f,
                    "{}\t{}\t{passed} passed, {failed} failed",
                    group.name,
                    if *reused { "complete" } else { "filtered" }
                )?,
                GroupStatus::Failed { kind, message } => {
                    writeln!(f, "{}\terror\t{kind}: {message}", group.name)?
                }
            }
        }
        write!(
            f,
            "{} filtered, {} skipped, {} failed",
            self.completed(),
            self.skipped(),
            self.failed()
        )
    }
}

/// Subdirectories of `root` holding at least one genome, sorted
pub fn species_directories(root: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(root).with_context(|| format!("Failed to list {}", root.display()))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let has_genomes = std::fs::read_dir(&path)
            .with_context(|| format!("Failed to list {}", path.display()))?
            .filter_map(|e| e.ok())
            .any(|e| e.path().is_file() && genome_id(&e.path()).is_some());
        if has_genomes {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn run_group(path: &Path, options: &QcOptions) -> GroupReport {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let status = match Species::open(path, options.clone()).and_then(|s| s.qc()) {
        Ok(SpeciesOutcome::TooFewGenomes { count }) => GroupStatus::TooFewGenomes { count },
        Ok(SpeciesOutcome::Completed(run)) => GroupStatus::Completed {
            passed: run.passed.len(),
            failed: run.ledger.len(),
            reused: run.reused,
        },
        Err(err) => {
            let kind = err
                .chain()
                .find_map(|e| e.downcast_ref::<QcError>())
                .map(|e| e.kind())
                .unwrap_or("error");
            error!("{name}: {kind}: {err:#}");
            GroupStatus::Failed {
                kind,
                message: format!("{err:#}"),
            }
        }
    };

    GroupReport {
        name,
        path: path.to_path_buf(),
        status,
    }
}

/// Run every species below `root` in parallel on the global rayon pool
pub fn run_batch(root: &Path, options: &QcOptions) -> Result<BatchReport> {
    let dirs = species_directories(root)?;
    info!("Found {} species under {}", dirs.len(), root.display());

    let groups = dirs
        .par_iter()
        .map(|dir| run_group(dir, options))
        .collect();
    Ok(BatchReport { groups })
}
