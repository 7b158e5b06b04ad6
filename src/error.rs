//! Error types for the quality-control core
//!
//! Too little data is not an error: the cascade expresses it as a skipped
//! step and the species pipeline as `SpeciesOutcome::TooFewGenomes`.

use std::path::{Path, PathBuf};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum QcError {
    /// Stats table or distance matrix that cannot be used as input
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A persisted artifact could not be read or written
    #[error("Persistence error at {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// Engine invariant broken; signals a bug rather than bad input
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),
}

impl QcError {
    pub fn persistence<P, E>(path: P, source: E) -> Self
    where
        P: AsRef<Path>,
        E: Into<BoxError>,
    {
        QcError::Persistence {
            path: path.as_ref().to_path_buf(),
            source: source.into(),
        }
    }

    /// Short tag used by the batch driver when logging a failed group
    pub fn kind(&self) -> &'static str {
        match self {
            QcError::MalformedInput(_) => "malformed input",
            QcError::Persistence { .. } => "persistence",
            QcError::ConsistencyViolation(_) => "consistency violation",
        }
    }
}

pub type QcResult<T> = std::result::Result<T, QcError>;
