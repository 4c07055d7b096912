//! Axum route handlers for the matching API.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::ranking::{CandidateAggregate, CandidateChunk, RankingQuery};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub candidates: Vec<CandidateAggregate>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateSearchRequest {
    pub query: String,
    pub k: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSearchResponse {
    pub candidate_id: String,
    pub chunks: Vec<CandidateChunk>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/matches
///
/// Ranks candidates against a job posting's requirements.
pub async fn handle_rank_candidates(
    State(state): State<AppState>,
    Json(request): Json<RankingQuery>,
) -> Result<Json<MatchResponse>, AppError> {
    let candidates = state.ranker.rank(&request).await?;
    Ok(Json(MatchResponse { candidates }))
}

/// POST /api/v1/candidates/:candidate_id/search
///
/// Returns the chunks of one candidate's resume closest to `query`.
pub async fn handle_candidate_search(
    State(state): State<AppState>,
    Path(candidate_id): Path<String>,
    Json(request): Json<CandidateSearchRequest>,
) -> Result<Json<CandidateSearchResponse>, AppError> {
    if candidate_id.trim().is_empty() {
        return Err(AppError::Validation("candidate_id cannot be empty".to_string()));
    }

    let chunks = state
        .ranker
        .candidate_matches(&candidate_id, &request.query, request.k)
        .await?;

    Ok(Json(CandidateSearchResponse {
        candidate_id,
        chunks,
    }))
}
