//! Criterion colors for phylogenetic tree annotation
//!
//! Tree construction and rendering live outside this crate. Annotators only
//! see the leaf names, the failure ledger and the palette, so the filtering
//! core never depends on a rendering library.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::QcError;
use crate::ledger::FailureLedger;
use crate::persist::write_atomic;
use crate::tolerance::Criterion;

/// Color used for leaves that passed every filter
pub const PASSED_COLOR: &str = "black";

/// Display color per criterion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: BTreeMap<Criterion, String>,
}

impl Default for Palette {
    fn default() -> Self {
        let colors = [
            (Criterion::Unknowns, "red"),
            (Criterion::Contigs, "green"),
            (Criterion::AssemblySize, "orange"),
            (Criterion::Distance, "purple"),
        ]
        .into_iter()
        .map(|(c, color)| (c, color.to_string()))
        .collect();
        Palette { colors }
    }
}

impl Palette {
    pub fn color(&self, criterion: Criterion) -> &str {
        self.colors
            .get(&criterion)
            .map(String::as_str)
            .unwrap_or(PASSED_COLOR)
    }

    pub fn set(&mut self, criterion: Criterion, color: &str) {
        self.colors.insert(criterion, color.to_string());
    }

    pub fn with_overrides(mut self, overrides: &[ColorOverride]) -> Self {
        for o in overrides {
            self.set(o.criterion, &o.color);
        }
        self
    }
}

/// `criterion=color` as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorOverride {
    pub criterion: Criterion,
    pub color: String,
}

impl FromStr for ColorOverride {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (criterion, color) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected criterion=color, got '{s}'"))?;
        let color = color.trim();
        if color.is_empty() {
            return Err(anyhow!("Empty color for '{criterion}'"));
        }
        Ok(ColorOverride {
            criterion: criterion.parse()?,
            color: color.to_string(),
        })
    }
}

/// Narrow seam between filtering results and tree rendering
pub trait TreeAnnotator {
    fn annotate(&self, leaves: &[&str], ledger: &FailureLedger, palette: &Palette) -> Result<()>;
}

/// Writes `id<TAB>criterion<TAB>color` per leaf, for external tree tools
#[derive(Debug, Clone)]
pub struct LeafColorTable {
    path: PathBuf,
}

impl LeafColorTable {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        LeafColorTable { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TreeAnnotator for LeafColorTable {
    fn annotate(&self, leaves: &[&str], ledger: &FailureLedger, palette: &Palette) -> Result<()> {
        let path = &self.path;
        write_atomic(path, |w| {
            let io = |e: std::io::Error| QcError::persistence(path, e);
            writeln!(w, "id\tcriterion\tcolor").map_err(io)?;
            for leaf in leaves {
                let (criterion, color) = match ledger.get(leaf) {
                    Some(c) => (c.as_str(), palette.color(c)),
                    None => ("passed", PASSED_COLOR),
                };
                writeln!(w, "{leaf}\t{criterion}\t{color}").map_err(io)?;
            }
            Ok(())
        })
        .with_context(|| format!("Failed to write leaf colors to {}", path.display()))
    }
}
