//! Ingest service error types.

use normalizer::DataKind;
use thiserror::Error;

/// Ingest service error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading failed validation for its data kind.
    #[error("Reading rejected for kind '{kind}': {reading}")]
    Rejected { kind: DataKind, reading: String },

    /// Record store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] storage::Error),

    /// Broker subscription, delivery or acknowledgement failure.
    #[error("Broker error: {0}")]
    Broker(#[from] anyhow::Error),

    /// Queue payload could not be decoded.
    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl Error {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Error::Rejected { .. })
    }
}

/// Result type for ingest service operations.
pub type Result<T> = std::result::Result<T, Error>;
