//! Qdrant vector store backend over gRPC.
//!
//! Chunks are stored as points with payload
//! `{"text": ..., "metadata": {"candidateId": ..., "chunkIndex": ...}}`, and
//! `metadata.candidateId` carries a keyword index for filtered search.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::json;
use tracing::{debug, info};

use crate::index::{
    CollectionSpec, CreateOutcome, DistanceMetric, IndexError, IndexedPoint, MetadataFilter,
    ScoredChunk, VectorStore, CANDIDATE_ID_FIELD,
};
use crate::ingestion::models::{ChunkMetadata, ResumeChunk};

/// Upserts larger than this are split into several requests.
const UPSERT_BATCH: usize = 256;

pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    pub fn connect(url: &str, api_key: Option<String>) -> Result<Self, IndexError> {
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .build()
            .map_err(map_err)?;
        Ok(Self { client })
    }
}

fn map_err(e: QdrantError) -> IndexError {
    IndexError::Backend {
        backend: "qdrant",
        message: e.to_string(),
    }
}

fn distance(metric: DistanceMetric) -> Distance {
    match metric {
        DistanceMetric::Cosine => Distance::Cosine,
        DistanceMetric::Dot => Distance::Dot,
    }
}

fn to_filter(filter: &MetadataFilter) -> Filter {
    match filter {
        MetadataFilter::CandidateId(id) => {
            Filter::must([Condition::matches(CANDIDATE_ID_FIELD, id.clone())])
        }
    }
}

fn to_point(point: IndexedPoint) -> Result<PointStruct, IndexError> {
    let payload = Payload::try_from(json!({
        "text": point.chunk.text,
        "metadata": {
            "candidateId": point.chunk.metadata.candidate_id,
            "chunkIndex": point.chunk.metadata.chunk_index,
        },
    }))
    .map_err(map_err)?;
    Ok(PointStruct::new(
        point.id.to_string(),
        point.vector,
        payload,
    ))
}

fn as_string(value: &QdrantValue) -> Option<String> {
    match &value.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn as_index(value: &QdrantValue) -> Option<usize> {
    match &value.kind {
        Some(Kind::IntegerValue(n)) => usize::try_from(*n).ok(),
        Some(Kind::DoubleValue(n)) if *n >= 0.0 => Some(*n as usize),
        _ => None,
    }
}

/// Rebuilds a chunk from a point payload. Missing fields decode as empty
/// values; the ranking engine drops hits without a candidate id.
fn decode_chunk(payload: &HashMap<String, QdrantValue>) -> ResumeChunk {
    let text = payload.get("text").and_then(as_string).unwrap_or_default();
    let metadata = payload.get("metadata").and_then(|v| match &v.kind {
        Some(Kind::StructValue(s)) => Some(&s.fields),
        _ => None,
    });

    let candidate_id = metadata
        .and_then(|m| m.get("candidateId"))
        .and_then(as_string)
        .unwrap_or_default();
    let chunk_index = metadata
        .and_then(|m| m.get("chunkIndex"))
        .and_then(as_index)
        .unwrap_or_default();

    ResumeChunk {
        text,
        metadata: ChunkMetadata {
            candidate_id,
            chunk_index,
        },
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn collection_exists(&self, name: &str) -> Result<bool, IndexError> {
        self.client.collection_exists(name).await.map_err(map_err)
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<CreateOutcome, IndexError> {
        let result = self
            .client
            .create_collection(
                CreateCollectionBuilder::new(spec.name.clone()).vectors_config(
                    VectorParamsBuilder::new(spec.dimension as u64, distance(spec.distance)),
                ),
            )
            .await;

        match result {
            Ok(_) => {
                info!(
                    collection = %spec.name,
                    dimension = spec.dimension,
                    "created qdrant collection"
                );
                Ok(CreateOutcome::Created)
            }
            // Another process won the race between our existence check and
            // the create call.
            Err(e) => {
                if self.collection_exists(&spec.name).await? {
                    debug!(collection = %spec.name, "collection created concurrently");
                    Ok(CreateOutcome::AlreadyExists)
                } else {
                    Err(map_err(e))
                }
            }
        }
    }

    async fn create_payload_index(&self, collection: &str, field: &str) -> Result<(), IndexError> {
        self.client
            .create_field_index(
                CreateFieldIndexCollectionBuilder::new(collection, field, FieldType::Keyword)
                    .wait(true),
            )
            .await
            .map_err(map_err)?;
        debug!(collection, field, "created qdrant payload index");
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<(), IndexError> {
        if points.is_empty() {
            return Ok(());
        }
        let total = points.len();
        let points = points
            .into_iter()
            .map(to_point)
            .collect::<Result<Vec<_>, _>>()?;

        for batch in points.chunks(UPSERT_BATCH) {
            self.client
                .upsert_points(UpsertPointsBuilder::new(collection, batch.to_vec()).wait(true))
                .await
                .map_err(map_err)?;
        }

        debug!(collection, count = total, "upserted points to qdrant");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let mut request =
            SearchPointsBuilder::new(collection, vector.to_vec(), k as u64).with_payload(true);
        if let Some(filter) = filter {
            request = request.filter(to_filter(filter));
        }

        let response = self.client.search_points(request).await.map_err(map_err)?;

        Ok(response
            .result
            .into_iter()
            .map(|scored| ScoredChunk {
                chunk: decode_chunk(&scored.payload),
                score: scored.score,
            })
            .collect())
    }

    async fn delete(&self, collection: &str, filter: &MetadataFilter) -> Result<(), IndexError> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(to_filter(filter))
                    .wait(true),
            )
            .await
            .map_err(map_err)?;
        debug!(collection, ?filter, "deleted points from qdrant");
        Ok(())
    }

    async fn count(
        &self,
        collection: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<u64, IndexError> {
        let mut request = CountPointsBuilder::new(collection).exact(true);
        if let Some(filter) = filter {
            request = request.filter(to_filter(filter));
        }
        let response = self.client.count(request).await.map_err(map_err)?;
        Ok(response.result.map(|r| r.count).unwrap_or_default())
    }
}
