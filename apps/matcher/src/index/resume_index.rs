use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::index::{
    CollectionSpec, CreateOutcome, IndexError, IndexedPoint, MetadataFilter, ScoredChunk,
    VectorStore, CANDIDATE_ID_FIELD,
};
use crate::ingestion::models::ResumeChunk;

/// Texts sent to the embedding provider per call.
const EMBED_BATCH: usize = 32;

/// Creates the collection if absent, then makes sure the candidate index
/// exists. Safe to call repeatedly and from several processes at once;
/// existing data is never touched. The payload index is requested every time,
/// so a process that died between the two steps is repaired on the next call.
pub async fn ensure_collection(
    store: &dyn VectorStore,
    spec: &CollectionSpec,
) -> Result<(), IndexError> {
    if store.collection_exists(&spec.name).await? {
        debug!(collection = %spec.name, "collection already exists");
    } else {
        match store.create_collection(spec).await? {
            CreateOutcome::Created => {
                info!(collection = %spec.name, "collection created");
            }
            CreateOutcome::AlreadyExists => {
                debug!(collection = %spec.name, "collection created by another instance");
            }
        }
    }

    store
        .create_payload_index(&spec.name, CANDIDATE_ID_FIELD)
        .await?;
    debug!(
        collection = %spec.name,
        field = CANDIDATE_ID_FIELD,
        "candidate payload index ensured"
    );
    Ok(())
}

/// A vector store plus the embedding provider that fills it.
pub struct ResumeIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    spec: CollectionSpec,
}

impl ResumeIndex {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        spec: CollectionSpec,
    ) -> Result<Self, IndexError> {
        if embedder.dimensions() != spec.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: spec.dimension,
                actual: embedder.dimensions(),
            });
        }
        Ok(Self {
            store,
            embedder,
            spec,
        })
    }

    pub fn collection(&self) -> &str {
        &self.spec.name
    }

    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        ensure_collection(self.store.as_ref(), &self.spec).await
    }

    /// Embeds and stores `chunks` as one logical write. Any failure fails the
    /// whole call; chunks written before the failure are not rolled back.
    pub async fn add_documents(&self, chunks: &[ResumeChunk]) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut points = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                }
                .into());
            }
            points.extend(batch.iter().zip(vectors).map(|(chunk, vector)| IndexedPoint {
                id: Uuid::new_v4(),
                vector,
                chunk: chunk.clone(),
            }));
        }

        let count = points.len();
        self.store.upsert(&self.spec.name, points).await?;
        Ok(count)
    }

    /// Embeds `query` and returns up to `k` hits, most similar first.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        self.store
            .search(&self.spec.name, &vector, k, filter)
            .await
    }

    /// Removes every chunk stored for `candidate_id`.
    pub async fn delete_candidate(&self, candidate_id: &str) -> Result<(), IndexError> {
        self.store
            .delete(&self.spec.name, &MetadataFilter::candidate(candidate_id))
            .await
    }

    pub async fn count(&self, filter: Option<&MetadataFilter>) -> Result<u64, IndexError> {
        self.store.count(&self.spec.name, filter).await
    }
}
