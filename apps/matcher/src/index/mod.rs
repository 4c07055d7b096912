//! Vector index: collection lifecycle, bulk insert and filtered similarity
//! search over resume chunks.
//!
//! [`VectorStore`] is the storage seam (Qdrant in production, in-memory for
//! tests and local runs). [`ResumeIndex`] adds embedding on top of a store,
//! and [`IndexHandle`] is the lazily initialised, process-wide handle the
//! worker and the ranking engine share.

pub mod handle;
pub mod memory;
pub mod qdrant;
pub mod resume_index;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::embedding::EmbeddingError;
use crate::ingestion::models::ResumeChunk;

pub use handle::{IndexConnector, IndexHandle};
pub use resume_index::ResumeIndex;

/// Payload path of the candidate id. Carries a keyword index for filtering.
pub const CANDIDATE_ID_FIELD: &str = "metadata.candidateId";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector store error ({backend}): {message}")]
    Backend { backend: &'static str, message: String },

    #[error("collection '{0}' does not exist")]
    CollectionMissing(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("embedding dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
}

/// Everything needed to create a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    pub distance: DistanceMetric,
}

impl CollectionSpec {
    pub fn cosine(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            distance: DistanceMetric::Cosine,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Someone else created it first. Treated as success.
    AlreadyExists,
}

/// Equality filter on chunk metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFilter {
    CandidateId(String),
}

impl MetadataFilter {
    pub fn candidate(id: impl Into<String>) -> Self {
        MetadataFilter::CandidateId(id.into())
    }

    pub fn matches(&self, chunk: &ResumeChunk) -> bool {
        match self {
            MetadataFilter::CandidateId(id) => chunk.metadata.candidate_id == *id,
        }
    }
}

/// A chunk with its vector, ready to be written. Every point gets a fresh id,
/// so inserting the same chunk twice stores it twice.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub chunk: ResumeChunk,
}

/// A search hit. Higher `score` means more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: ResumeChunk,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool, IndexError>;

    /// Creates the collection, reporting [`CreateOutcome::AlreadyExists`]
    /// instead of failing when it is already there.
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<CreateOutcome, IndexError>;

    /// Adds a keyword index on a payload field.
    async fn create_payload_index(&self, collection: &str, field: &str) -> Result<(), IndexError>;

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<(), IndexError>;

    /// Returns up to `k` chunks ordered by descending similarity.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>, IndexError>;

    async fn delete(&self, collection: &str, filter: &MetadataFilter) -> Result<(), IndexError>;

    async fn count(
        &self,
        collection: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<u64, IndexError>;
}
