use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns service status, version and whether the vector index is connected.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "matcher",
        "index": if state.index.is_ready() { "ready" } else { "pending" },
        "collection": state.config.collection_name,
    }))
}
