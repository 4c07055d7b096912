use std::sync::Arc;

use crate::config::Config;
use crate::index::IndexHandle;
use crate::ranking::CandidateRanker;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Process-wide vector index handle, shared with the ingestion workers.
    pub index: Arc<IndexHandle>,
    pub ranker: Arc<CandidateRanker>,
}
