use anyhow::Result;
use clap::Parser;
use log::{info, LevelFilter};
use std::path::PathBuf;

use genomeqc::batch::run_batch;
use genomeqc::mash::{DEFAULT_KMER_SIZE, DEFAULT_SKETCH_SIZE};
use genomeqc::species::{QcOptions, Species, SpeciesOutcome};
use genomeqc::stats_table::ColumnMap;
use genomeqc::tolerance::ToleranceConfig;
use genomeqc::tree::{ColorOverride, Palette};

/// genomeqc - Statistical quality control for genome assemblies
///
/// Filters the genomes of a species directory by unknown bases, contig
/// count, assembly size and mean mash distance, each relative to the
/// species' own median.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Species directory of FASTA files, or a root of species directories with --batch
    #[clap(value_name = "PATH")]
    path: PathBuf,

    /// Treat PATH as a root and filter every species directory below it
    #[clap(long = "batch")]
    batch: bool,

    /// Maximum number of unknown (N) bases
    #[clap(long = "max-unknowns", default_value = "200")]
    max_unknowns: u64,

    /// Deviation multiplier for contig counts
    #[clap(long = "contigs", default_value = "3.0")]
    contigs: f64,

    /// Deviation multiplier for assembly size
    #[clap(long = "assembly-size", default_value = "3.0")]
    assembly_size: f64,

    /// Deviation multiplier for mean mash distance
    #[clap(long = "distance", default_value = "3.0")]
    distance: f64,

    /// Read existing stats tables with the legacy column names
    #[clap(long = "legacy-columns")]
    legacy_columns: bool,

    /// Override a tree color, e.g. contigs=blue (repeatable)
    #[clap(long = "color", value_name = "CRITERION=COLOR")]
    colors: Vec<ColorOverride>,

    /// K-mer size for mash sketches
    #[clap(long = "kmer-size", default_value_t = DEFAULT_KMER_SIZE)]
    kmer_size: usize,

    /// Number of hashes kept per sketch
    #[clap(long = "sketch-size", default_value_t = DEFAULT_SKETCH_SIZE)]
    sketch_size: usize,

    /// Do not link passed genomes into the results directory
    #[clap(long = "no-link")]
    no_link: bool,

    /// Number of threads for parallel processing
    #[clap(short = 't', long = "threads", default_value = "8")]
    threads: usize,

    /// Quiet mode (errors only)
    #[clap(long = "quiet")]
    quiet: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Error;
        }
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn options(&self) -> Result<QcOptions> {
        let config = ToleranceConfig {
            max_unknowns: self.max_unknowns,
            contigs_multiplier: self.contigs,
            assembly_size_multiplier: self.assembly_size,
            distance_multiplier: self.distance,
        };
        config.validate()?;
        if self.kmer_size == 0 || self.sketch_size == 0 {
            anyhow::bail!("--kmer-size and --sketch-size must be positive");
        }

        Ok(QcOptions {
            config,
            columns: if self.legacy_columns {
                ColumnMap::legacy()
            } else {
                ColumnMap::default()
            },
            palette: Palette::default().with_overrides(&self.colors),
            kmer_size: self.kmer_size,
            sketch_size: self.sketch_size,
            link: !self.no_link,
        })
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG takes precedence over the flags
    env_logger::Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .format_timestamp(None)
        .init();

    let options = args.options()?;

    // Set up rayon thread pool
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()?;

    if args.batch {
        let report = run_batch(&args.path, &options)?;
        println!("{report}");
        if report.has_failures() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let species = Species::open(&args.path, options)?;
    info!("{species}");
    match species.qc()? {
        SpeciesOutcome::TooFewGenomes { count } => {
            println!("{}: {count} genomes, nothing to filter", species.name());
        }
        SpeciesOutcome::Completed(run) => {
            print!("{}", run.summary);
            println!(
                "\n{} passed, {} failed",
                run.passed.len(),
                run.ledger.len()
            );
        }
    }
    Ok(())
}
