//! In-memory vector store.
//!
//! Brute-force search over a `Vec` per collection behind a
//! `tokio::sync::RwLock`. Same filter and ordering semantics as Qdrant, for
//! tests and single-process development.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::index::{
    CollectionSpec, CreateOutcome, DistanceMetric, IndexError, IndexedPoint, MetadataFilter,
    ScoredChunk, VectorStore,
};

#[derive(Debug)]
struct Collection {
    spec: CollectionSpec,
    points: Vec<IndexedPoint>,
    payload_indexes: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload fields that carry an index in `collection`.
    pub async fn payload_indexes(&self, collection: &str) -> Vec<String> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.payload_indexes.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn missing(name: &str) -> IndexError {
    IndexError::CollectionMissing(name.to_string())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn collection_exists(&self, name: &str) -> Result<bool, IndexError> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<CreateOutcome, IndexError> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(&spec.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        collections.insert(
            spec.name.clone(),
            Collection {
                spec: spec.clone(),
                points: Vec::new(),
                payload_indexes: BTreeSet::new(),
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn create_payload_index(&self, collection: &str, field: &str) -> Result<(), IndexError> {
        let mut collections = self.collections.write().await;
        let c = collections.get_mut(collection).ok_or_else(|| missing(collection))?;
        c.payload_indexes.insert(field.to_string());
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<(), IndexError> {
        let mut collections = self.collections.write().await;
        let c = collections.get_mut(collection).ok_or_else(|| missing(collection))?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != c.spec.dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: c.spec.dimension,
                actual: bad.vector.len(),
            });
        }
        for point in points {
            match c.points.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point,
                None => c.points.push(point),
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let collections = self.collections.read().await;
        let c = collections.get(collection).ok_or_else(|| missing(collection))?;

        let score = |p: &IndexedPoint| match c.spec.distance {
            DistanceMetric::Cosine => cosine_similarity(&p.vector, vector),
            DistanceMetric::Dot => dot(&p.vector, vector),
        };

        let mut hits: Vec<ScoredChunk> = c
            .points
            .iter()
            .filter(|p| filter.map_or(true, |f| f.matches(&p.chunk)))
            .map(|p| ScoredChunk {
                chunk: p.chunk.clone(),
                score: score(p),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, filter: &MetadataFilter) -> Result<(), IndexError> {
        let mut collections = self.collections.write().await;
        let c = collections.get_mut(collection).ok_or_else(|| missing(collection))?;
        c.points.retain(|p| !filter.matches(&p.chunk));
        Ok(())
    }

    async fn count(
        &self,
        collection: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<u64, IndexError> {
        let collections = self.collections.read().await;
        let c = collections.get(collection).ok_or_else(|| missing(collection))?;
        let n = c
            .points
            .iter()
            .filter(|p| filter.map_or(true, |f| f.matches(&p.chunk)))
            .count();
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::models::{ChunkMetadata, ResumeChunk};
    use uuid::Uuid;

    fn point(candidate: &str, index: usize, vector: Vec<f32>) -> IndexedPoint {
        IndexedPoint {
            id: Uuid::new_v4(),
            vector,
            chunk: ResumeChunk {
                text: format!("{candidate}-{index}"),
                metadata: ChunkMetadata {
                    candidate_id: candidate.to_string(),
                    chunk_index: index,
                },
            },
        }
    }

    async fn store_with_points() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .create_collection(&CollectionSpec::cosine("resume", 2))
            .await
            .unwrap();
        store
            .upsert(
                "resume",
                vec![
                    point("a", 0, vec![1.0, 0.0]),
                    point("a", 1, vec![0.6, 0.8]),
                    point("b", 0, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_twice_reports_already_exists() {
        let store = InMemoryStore::new();
        let spec = CollectionSpec::cosine("resume", 2);
        assert_eq!(store.create_collection(&spec).await.unwrap(), CreateOutcome::Created);
        assert_eq!(
            store.create_collection(&spec).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_search_orders_by_descending_similarity() {
        let store = store_with_points().await;
        let hits = store.search("resume", &[1.0, 0.0], 10, None).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["a-0", "a-1", "b-0"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_search_truncates_to_k() {
        let store = store_with_points().await;
        let hits = store.search("resume", &[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_search_with_candidate_filter() {
        let store = store_with_points().await;
        let filter = MetadataFilter::candidate("b");
        let hits = store
            .search("resume", &[1.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.candidate_id(), "b");
    }

    #[tokio::test]
    async fn test_delete_by_candidate() {
        let store = store_with_points().await;
        store
            .delete("resume", &MetadataFilter::candidate("a"))
            .await
            .unwrap();
        assert_eq!(store.count("resume", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dimension() {
        let store = store_with_points().await;
        let err = store
            .upsert("resume", vec![point("c", 0, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let store = InMemoryStore::new();
        let err = store.search("resume", &[1.0], 5, None).await.unwrap_err();
        assert!(matches!(err, IndexError::CollectionMissing(_)));
    }
}
