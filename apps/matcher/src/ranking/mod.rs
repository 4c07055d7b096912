//! Candidate Ranking Engine.
//!
//! Searches the whole collection for chunks similar to a job's requirements,
//! then folds the hits into one aggregate per candidate.

pub mod handlers;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::index::{IndexError, IndexHandle, MetadataFilter, ScoredChunk};

/// Chunks kept per candidate for explaining a match.
pub const TOP_CHUNKS: usize = 3;

/// Upper bound on `k` accepted from callers.
pub const MAX_K: usize = 1000;

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("query text is empty")]
    EmptyQuery,

    #[error("k must be between 1 and {MAX_K}, got {0}")]
    InvalidK(usize),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Structured requirements of a job posting.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingQuery {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub additional_skills: Vec<String>,
    pub k: Option<usize>,
}

impl RankingQuery {
    /// Role, description, technologies and additional skills, in that order,
    /// one per line. List fields are comma-joined; empty fields are skipped.
    pub fn query_text(&self) -> String {
        let technologies = join_list(&self.technologies);
        let skills = join_list(&self.additional_skills);
        [
            self.role.trim(),
            self.description.trim(),
            technologies.as_str(),
            skills.as_str(),
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
    }
}

fn join_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopChunk {
    pub text: String,
    pub score: f32,
}

/// Per-candidate statistics over one query's hits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateAggregate {
    pub candidate_id: String,
    pub best_score: f32,
    pub avg_score: f32,
    pub sum_score: f32,
    pub count: usize,
    /// Highest-scoring chunks, best first, at most [`TOP_CHUNKS`].
    pub top_chunks: Vec<TopChunk>,
}

impl CandidateAggregate {
    fn new(candidate_id: String) -> Self {
        Self {
            candidate_id,
            best_score: f32::NEG_INFINITY,
            avg_score: 0.0,
            sum_score: 0.0,
            count: 0,
            top_chunks: Vec::with_capacity(TOP_CHUNKS + 1),
        }
    }

    fn add(&mut self, text: String, score: f32) {
        self.best_score = self.best_score.max(score);
        self.sum_score += score;
        self.count += 1;
        self.avg_score = self.sum_score / self.count as f32;

        self.top_chunks.push(TopChunk { text, score });
        // stable: equal scores keep arrival order
        self.top_chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.top_chunks.truncate(TOP_CHUNKS);
    }
}

/// Best score first, then average score, then candidate id ascending.
pub fn compare_aggregates(a: &CandidateAggregate, b: &CandidateAggregate) -> Ordering {
    b.best_score
        .total_cmp(&a.best_score)
        .then_with(|| b.avg_score.total_cmp(&a.avg_score))
        .then_with(|| a.candidate_id.cmp(&b.candidate_id))
}

/// Folds search hits into ranked per-candidate aggregates. Hits without a
/// candidate id are ignored.
pub fn aggregate_matches<I>(matches: I) -> Vec<CandidateAggregate>
where
    I: IntoIterator<Item = ScoredChunk>,
{
    let mut by_candidate: HashMap<String, CandidateAggregate> = HashMap::new();
    for hit in matches {
        let ScoredChunk { chunk, score } = hit;
        if chunk.metadata.candidate_id.is_empty() {
            continue;
        }
        by_candidate
            .entry(chunk.metadata.candidate_id.clone())
            .or_insert_with_key(|id| CandidateAggregate::new(id.clone()))
            .add(chunk.text, score);
    }

    let mut ranked: Vec<CandidateAggregate> = by_candidate.into_values().collect();
    ranked.sort_by(compare_aggregates);
    ranked
}

/// A chunk of one candidate's resume with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateChunk {
    pub chunk_index: usize,
    pub text: String,
    pub score: f32,
}

pub struct CandidateRanker {
    index: Arc<IndexHandle>,
    default_k: usize,
}

impl CandidateRanker {
    pub fn new(index: Arc<IndexHandle>, default_k: usize) -> Self {
        Self { index, default_k }
    }

    fn resolve_k(&self, k: Option<usize>) -> Result<usize, RankingError> {
        match k.unwrap_or(self.default_k) {
            k @ 1..=MAX_K => Ok(k),
            k => Err(RankingError::InvalidK(k)),
        }
    }

    pub async fn rank(&self, query: &RankingQuery) -> Result<Vec<CandidateAggregate>, RankingError> {
        let k = self.resolve_k(query.k)?;
        self.rank_candidates(&query.query_text(), k).await
    }

    /// Top-`k` chunks across all candidates, aggregated per candidate. An
    /// unavailable index is an error, never an empty ranking.
    pub async fn rank_candidates(
        &self,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<CandidateAggregate>, RankingError> {
        if query_text.trim().is_empty() {
            return Err(RankingError::EmptyQuery);
        }
        let index = self.index.get().await?;
        let hits = index.similarity_search(query_text, k, None).await?;
        let hit_count = hits.len();
        let ranked = aggregate_matches(hits);
        debug!(k, hits = hit_count, candidates = ranked.len(), "ranked candidates");
        Ok(ranked)
    }

    /// One candidate's chunks most similar to `query`, best first.
    pub async fn candidate_matches(
        &self,
        candidate_id: &str,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<CandidateChunk>, RankingError> {
        if query.trim().is_empty() {
            return Err(RankingError::EmptyQuery);
        }
        let k = self.resolve_k(k)?;
        let index = self.index.get().await?;
        let filter = MetadataFilter::candidate(candidate_id);
        let hits = index.similarity_search(query, k, Some(&filter)).await?;
        Ok(hits
            .into_iter()
            .map(|hit| CandidateChunk {
                chunk_index: hit.chunk.metadata.chunk_index,
                text: hit.chunk.text,
                score: hit.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingProvider;
    use crate::index::handle::InMemoryConnector;
    use crate::index::memory::InMemoryStore;
    use crate::index::{CollectionSpec, IndexConnector, ResumeIndex};
    use crate::ingestion::chunker::{ChunkerConfig, FixedSizeChunker};
    use crate::ingestion::models::{ChunkMetadata, ResumeChunk};
    use async_trait::async_trait;

    fn hit(candidate: &str, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: ResumeChunk {
                text: text.to_string(),
                metadata: ChunkMetadata {
                    candidate_id: candidate.to_string(),
                    chunk_index: 0,
                },
            },
            score,
        }
    }

    #[test]
    fn test_aggregation_example() {
        let ranked = aggregate_matches(vec![
            hit("A", "a1", 0.9),
            hit("B", "b1", 0.8),
            hit("A", "a2", 0.95),
            hit("C", "c1", 0.5),
            hit("A", "a3", 0.7),
        ]);

        let ids: Vec<&str> = ranked.iter().map(|c| c.candidate_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);

        let a = &ranked[0];
        assert_eq!(a.best_score, 0.95);
        assert_eq!(a.count, 3);
        assert!((a.avg_score - 0.85).abs() < 1e-6);
        assert!((a.sum_score - 2.55).abs() < 1e-6);
        let top: Vec<f32> = a.top_chunks.iter().map(|c| c.score).collect();
        assert_eq!(top, vec![0.95, 0.9, 0.7]);
        assert_eq!(a.top_chunks[0].text, "a2");
    }

    #[test]
    fn test_top_chunks_capped_at_three() {
        let ranked = aggregate_matches(vec![
            hit("A", "1", 0.1),
            hit("A", "2", 0.4),
            hit("A", "3", 0.3),
            hit("A", "4", 0.2),
        ]);
        let top: Vec<&str> = ranked[0].top_chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(top, vec!["2", "3", "4"]);
        assert_eq!(ranked[0].count, 4);
    }

    #[test]
    fn test_ties_break_on_average_then_id() {
        let ranked = aggregate_matches(vec![
            hit("zed", "z", 0.9),
            hit("amy", "a", 0.9),
            hit("bob", "b1", 0.9),
            hit("bob", "b2", 0.5),
        ]);
        let ids: Vec<&str> = ranked.iter().map(|c| c.candidate_id.as_str()).collect();
        assert_eq!(ids, vec!["amy", "zed", "bob"]);
    }

    #[test]
    fn test_hits_without_candidate_are_ignored() {
        let ranked = aggregate_matches(vec![hit("", "orphan", 0.99), hit("A", "a", 0.1)]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].candidate_id, "A");
    }

    #[test]
    fn test_empty_matches_give_empty_ranking() {
        assert!(aggregate_matches(Vec::new()).is_empty());
    }

    #[test]
    fn test_query_text_order_and_omission() {
        let query = RankingQuery {
            role: "Backend Engineer".into(),
            description: "  ".into(),
            technologies: vec!["Rust".into(), " ".into(), "Postgres".into()],
            additional_skills: vec![],
            k: None,
        };
        assert_eq!(query.query_text(), "Backend Engineer\nRust, Postgres");
    }

    #[test]
    fn test_query_deserializes_camel_case() {
        let query: RankingQuery = serde_json::from_str(
            r#"{"role":"SRE","description":"On-call","technologies":["Go"],"additionalSkills":["Terraform"],"k":10}"#,
        )
        .unwrap();
        assert_eq!(query.query_text(), "SRE\nOn-call\nGo\nTerraform");
        assert_eq!(query.k, Some(10));
    }

    #[test]
    fn test_aggregate_serializes_camel_case() {
        let ranked = aggregate_matches(vec![hit("A", "a", 0.5)]);
        let value = serde_json::to_value(&ranked[0]).unwrap();
        assert_eq!(value["candidateId"], "A");
        assert!(value["bestScore"].is_number());
        assert_eq!(value["topChunks"][0]["text"], "a");
    }

    async fn ranker_with(resumes: &[(&str, &str)]) -> CandidateRanker {
        let handle = Arc::new(IndexHandle::new(InMemoryConnector {
            store: Arc::new(InMemoryStore::new()),
            embedder: Arc::new(HashEmbeddingProvider::new(64).unwrap()),
            spec: CollectionSpec::cosine("resume", 64),
        }));
        let chunker = FixedSizeChunker::new(ChunkerConfig::default());
        let index = handle.get().await.unwrap();
        for (candidate, text) in resumes {
            index
                .add_documents(&chunker.chunk_resume(text, candidate))
                .await
                .unwrap();
        }
        CandidateRanker::new(handle, 50)
    }

    #[tokio::test]
    async fn test_rank_prefers_matching_resume() {
        let ranker = ranker_with(&[
            ("rustacean", "Rust tokio axum async services"),
            ("designer", "Figma typography branding illustration"),
        ])
        .await;

        let ranked = ranker
            .rank(&RankingQuery {
                role: "Rust engineer".into(),
                technologies: vec!["tokio".into(), "axum".into()],
                ..RankingQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(ranked[0].candidate_id, "rustacean");
    }

    #[tokio::test]
    async fn test_rank_on_empty_collection_is_empty() {
        let ranker = ranker_with(&[]).await;
        let ranked = ranker.rank_candidates("anything at all", 10).await.unwrap();
        assert!(ranked.is_empty());
    }

    #[tokio::test]
    async fn test_rank_rejects_bad_input() {
        let ranker = ranker_with(&[]).await;
        assert!(matches!(
            ranker.rank(&RankingQuery::default()).await,
            Err(RankingError::EmptyQuery)
        ));
        let query = RankingQuery {
            role: "SRE".into(),
            k: Some(0),
            ..RankingQuery::default()
        };
        assert!(matches!(
            ranker.rank(&query).await,
            Err(RankingError::InvalidK(0))
        ));
    }

    struct DownConnector;

    #[async_trait]
    impl IndexConnector for DownConnector {
        async fn connect(&self) -> Result<ResumeIndex, IndexError> {
            Err(IndexError::Backend {
                backend: "test",
                message: "unreachable".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_unavailable_index_is_an_error_not_empty() {
        let ranker = CandidateRanker::new(Arc::new(IndexHandle::new(DownConnector)), 50);
        let err = ranker.rank_candidates("rust", 10).await.unwrap_err();
        assert!(matches!(err, RankingError::Index(IndexError::Backend { .. })));
    }

    #[tokio::test]
    async fn test_candidate_matches_stay_within_candidate() {
        let ranker = ranker_with(&[
            ("a", "Kubernetes operators in Go"),
            ("b", "Kubernetes Helm charts"),
        ])
        .await;
        let chunks = ranker
            .candidate_matches("b", "kubernetes", Some(5))
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Kubernetes Helm charts");
        assert_eq!(chunks[0].chunk_index, 0);
    }
}
