pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::ranking::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Matching API
        .route("/api/v1/matches", post(handlers::handle_rank_candidates))
        .route(
            "/api/v1/candidates/:candidate_id/search",
            post(handlers::handle_candidate_search),
        )
        .with_state(state)
}
