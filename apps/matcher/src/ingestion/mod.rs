// Resume ingestion: queue payload → text → chunks → vector index.
// The worker runs one resume at a time; the pool runs many workers.

pub mod chunker;
pub mod extractor;
pub mod models;
pub mod pool;
pub mod worker;

use thiserror::Error;

use crate::index::IndexError;
use crate::ingestion::extractor::ExtractError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed job payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("vector index unavailable: {0}")]
    IndexSetup(#[source] IndexError),

    #[error("failed to index resume chunks: {0}")]
    IndexWrite(#[source] IndexError),
}

/// How a failure should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The payload can never be processed. Dropped without retry.
    Malformed,
    /// The document type will never be supported. Dead-lettered at once.
    Unsupported,
    /// The document could not be parsed. Retried a small number of times.
    Extraction,
    /// I/O or index trouble that may clear up on its own.
    Transient,
}

impl IngestError {
    pub fn kind(&self) -> FailureKind {
        match self {
            IngestError::Malformed(_) => FailureKind::Malformed,
            IngestError::Extract(ExtractError::Unsupported { .. }) => FailureKind::Unsupported,
            IngestError::Extract(ExtractError::Corrupt { .. }) => FailureKind::Extraction,
            IngestError::Extract(ExtractError::Missing { .. })
            | IngestError::Extract(ExtractError::Unreadable { .. })
            | IngestError::IndexSetup(_)
            | IngestError::IndexWrite(_) => FailureKind::Transient,
        }
    }
}
