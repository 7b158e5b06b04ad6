// Library exports for genomeqc
pub mod batch;
pub mod error;
pub mod filter_engine;
pub mod genome;
pub mod guard;
pub mod ledger;
pub mod link;
pub mod mash;
pub mod persist;
pub mod species;
pub mod stats;
pub mod stats_table;
pub mod summary;
pub mod tolerance;
pub mod tree;

pub use error::{QcError, QcResult};
pub use filter_engine::{Allowed, FilterEngine, FilterReport};
pub use ledger::FailureLedger;
pub use species::{QcOptions, Species, SpeciesOutcome};
pub use stats_table::{GenomeRecord, StatsTable};
pub use tolerance::{Criterion, ToleranceConfig};
