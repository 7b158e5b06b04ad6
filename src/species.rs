//! Quality control of one species directory
//!
//! Layout, relative to the species directory:
//!
//! ```text
//! *.fasta                      genomes
//! qc/stats.csv                 stats table, shared by all tolerance labels
//! qc/dmx.tsv                   pairwise distance matrix
//! qc/<label>/failed.csv        failure report
//! qc/<label>/summary.txt       human-readable summary
//! qc/<label>/allowed.json      completion marker
//! qc/<label>/leaf_colors.tsv   tree annotation
//! qc/<label>/passed/           links to passed genomes
//! ```

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::QcError;
use crate::filter_engine::{Allowed, FilterEngine, MIN_PASSED};
use crate::genome::{self, GenomeFile};
use crate::guard::{CompletionGuard, CompletionMarker, GuardDecision};
use crate::ledger::FailureLedger;
use crate::link::link_passed;
use crate::mash::{DistanceMatrix, KmerSketch, DEFAULT_KMER_SIZE, DEFAULT_SKETCH_SIZE};
use crate::persist::write_string_atomic;
use crate::stats_table::{ColumnMap, GenomeRecord, StatsTable};
use crate::summary::Summary;
use crate::tolerance::{Criterion, ToleranceConfig};
use crate::tree::{LeafColorTable, Palette, TreeAnnotator};

/// Everything that parameterises a run besides the genomes themselves
#[derive(Debug, Clone)]
pub struct QcOptions {
    pub config: ToleranceConfig,
    pub columns: ColumnMap,
    pub palette: Palette,
    pub kmer_size: usize,
    pub sketch_size: usize,
    pub link: bool,
}

impl Default for QcOptions {
    fn default() -> Self {
        QcOptions {
            config: ToleranceConfig::default(),
            columns: ColumnMap::default(),
            palette: Palette::default(),
            kmer_size: DEFAULT_KMER_SIZE,
            sketch_size: DEFAULT_SKETCH_SIZE,
            link: true,
        }
    }
}

/// Artifact locations for one species and one tolerance label
#[derive(Debug, Clone)]
pub struct SpeciesPaths {
    pub qc_dir: PathBuf,
    pub stats: PathBuf,
    pub dmx: PathBuf,
    pub results_dir: PathBuf,
    pub failed: PathBuf,
    pub summary: PathBuf,
    pub marker: PathBuf,
    pub leaf_colors: PathBuf,
    pub passed_dir: PathBuf,
}

impl SpeciesPaths {
    pub fn new(species_dir: &Path, label: &str) -> Self {
        let qc_dir = species_dir.join("qc");
        let results_dir = qc_dir.join(label);
        SpeciesPaths {
            stats: qc_dir.join("stats.csv"),
            dmx: qc_dir.join("dmx.tsv"),
            failed: results_dir.join("failed.csv"),
            summary: results_dir.join("summary.txt"),
            marker: results_dir.join("allowed.json"),
            leaf_colors: results_dir.join("leaf_colors.tsv"),
            passed_dir: results_dir.join("passed"),
            results_dir,
            qc_dir,
        }
    }
}

/// Final state of a species run
#[derive(Debug, Clone, PartialEq)]
pub struct QcRun {
    pub allowed: BTreeMap<Criterion, Allowed>,
    pub ledger: FailureLedger,
    pub passed: Vec<String>,
    pub summary: Summary,
    /// Results were reloaded from a previous run with the same ids
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeciesOutcome {
    TooFewGenomes { count: usize },
    Completed(QcRun),
}

/// A directory of related genomes
#[derive(Debug, Clone)]
pub struct Species {
    name: String,
    path: PathBuf,
    genomes: Vec<GenomeFile>,
    options: QcOptions,
    paths: SpeciesPaths,
}

impl Species {
    pub fn open<P: AsRef<Path>>(path: P, options: QcOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let genomes = genome::discover_genomes(&path)?;
        let paths = SpeciesPaths::new(&path, &options.config.label());
        Ok(Species {
            name,
            path,
            genomes,
            options,
            paths,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn paths(&self) -> &SpeciesPaths {
        &self.paths
    }

    pub fn total_genomes(&self) -> usize {
        self.genomes.len()
    }

    fn genome_ids(&self) -> BTreeSet<String> {
        self.genomes.iter().map(|g| g.id.clone()).collect()
    }

    /// Stats, cascade, reports, links and tree colors for this species
    pub fn qc(&self) -> Result<SpeciesOutcome> {
        let count = self.total_genomes();
        if count <= MIN_PASSED {
            info!("{}: only {count} genomes, skipping", self.name);
            return Ok(SpeciesOutcome::TooFewGenomes { count });
        }

        let table = self.stats_table()?;
        let run = self.filter(&table)?;

        let passed: Vec<&str> = run.passed.iter().map(String::as_str).collect();
        if self.options.link {
            let placed = link_passed(&self.genomes, &passed, &self.paths.passed_dir)?;
            debug!("{}: linked {placed} passed genomes", self.name);
        }

        let leaves: Vec<&str> = table.ids().collect();
        LeafColorTable::new(&self.paths.leaf_colors).annotate(
            &leaves,
            &run.ledger,
            &self.options.palette,
        )?;

        info!(
            "{}: {} of {} genomes passed{}",
            self.name,
            run.passed.len(),
            table.len(),
            if run.reused { " (already complete)" } else { "" }
        );
        Ok(SpeciesOutcome::Completed(run))
    }

    /// Load the persisted stats table when it covers exactly the genomes on
    /// disk, otherwise collect fresh stats and persist them
    pub fn stats_table(&self) -> Result<StatsTable> {
        if self.paths.stats.exists() {
            let table = self.read_stats()?;
            if table.id_set() == self.genome_ids() {
                debug!("{}: reusing {}", self.name, self.paths.stats.display());
                return Ok(table);
            }
            info!("{}: genome set changed, recollecting stats", self.name);
        }

        let table = self.collect_stats()?;
        table.write_csv(&self.paths.stats)?;
        Ok(table)
    }

    /// Tables written by this crate always use the default columns, so a
    /// configured layout that does not match falls back to those
    fn read_stats(&self) -> Result<StatsTable> {
        let path = &self.paths.stats;
        let columns = &self.options.columns;
        match StatsTable::read_csv_with(path, columns) {
            Ok(table) => Ok(table),
            Err(QcError::MalformedInput(msg)) if *columns != ColumnMap::default() => {
                debug!("{}: {msg}, trying default columns", self.name);
                StatsTable::read_csv(path).map_err(|_| QcError::MalformedInput(msg).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn collect_stats(&self) -> Result<StatsTable> {
        info!("{}: collecting stats for {} genomes", self.name, self.genomes.len());
        let collected = genome::collect(
            &self.genomes,
            self.options.kmer_size,
            self.options.sketch_size,
        )
        .with_context(|| format!("Failed to collect stats for {}", self.name))?;
        let (assemblies, sketches): (Vec<_>, Vec<KmerSketch>) = collected.into_iter().unzip();

        let matrix = self.distance_matrix(&sketches)?;
        let means: HashMap<String, f64> = matrix.row_means().into_iter().collect();

        let records = self
            .genomes
            .iter()
            .zip(assemblies)
            .map(|(genome, stats)| {
                let distance = means.get(&genome.id).copied().ok_or_else(|| {
                    QcError::MalformedInput(format!(
                        "genome '{}' missing from distance matrix",
                        genome.id
                    ))
                })?;
                Ok(GenomeRecord {
                    id: genome.id.clone(),
                    unknown_bases: stats.unknown_bases,
                    contigs: stats.contigs,
                    assembly_size: stats.assembly_size,
                    distance,
                })
            })
            .collect::<Result<Vec<_>, QcError>>()?;

        Ok(StatsTable::from_records(records)?)
    }

    /// Reuse `dmx.tsv` if it matches the genome set
    fn distance_matrix(&self, sketches: &[KmerSketch]) -> Result<DistanceMatrix> {
        if self.paths.dmx.exists() {
            match DistanceMatrix::read_tsv(&self.paths.dmx) {
                Ok(matrix) => {
                    let ids: BTreeSet<String> = matrix.ids().iter().cloned().collect();
                    if ids == self.genome_ids() {
                        debug!("{}: reusing {}", self.name, self.paths.dmx.display());
                        return Ok(matrix);
                    }
                }
                Err(e) => warn!("{}: ignoring unreadable distance matrix: {e}", self.name),
            }
        }

        let ids = self.genomes.iter().map(|g| g.id.clone()).collect();
        let matrix = DistanceMatrix::from_sketches(ids, sketches)?;
        matrix.write_tsv(&self.paths.dmx)?;
        Ok(matrix)
    }

    /// Guarded cascade: reload a finished run or filter and persist
    pub fn filter(&self, table: &StatsTable) -> Result<QcRun> {
        let config = &self.options.config;
        let label = config.label();
        let guard = CompletionGuard::new(&self.paths.marker, &label);

        match guard.check(Some(table))? {
            GuardDecision::Complete(marker) if self.paths.failed.exists() => {
                let ledger = FailureLedger::read_csv(&self.paths.failed)?;
                let passed: Vec<String> =
                    ledger.passed(table).into_iter().map(String::from).collect();
                ledger.verify_partition(&passed, table)?;
                info!("{}: already complete", self.name);
                let summary = Summary::new(&self.name, config, &marker.allowed, &ledger);
                return Ok(QcRun {
                    allowed: marker.allowed,
                    ledger,
                    passed,
                    summary,
                    reused: true,
                });
            }
            GuardDecision::Complete(_) => {
                warn!("{}: marker present but failure report missing, rerunning", self.name)
            }
            GuardDecision::Stale(reason) => debug!("{}: running cascade ({reason:?})", self.name),
        }

        let report = FilterEngine::new(*config).run(table)?;
        let ledger = FailureLedger::from_report(&report, table)?;
        let allowed = report.allowed();
        let summary = Summary::new(&self.name, config, &allowed, &ledger);

        // The marker goes last: without it the next run starts over
        ledger.write_csv(&self.paths.failed)?;
        write_string_atomic(&self.paths.summary, &summary.to_string())?;
        guard.commit(&CompletionMarker::new(&label, allowed.clone(), table))?;

        Ok(QcRun {
            allowed,
            ledger,
            passed: report.passed().to_vec(),
            summary,
            reused: false,
        })
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Species: {}", self.name)?;
        write!(f, "{}", self.options.config)
    }
}
