#![allow(dead_code)]

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::index::IndexError;
use crate::ranking::RankingError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<RankingError> for AppError {
    fn from(e: RankingError) -> Self {
        match e {
            RankingError::EmptyQuery | RankingError::InvalidK(_) => {
                AppError::Validation(e.to_string())
            }
            RankingError::Index(IndexError::Embedding(e)) => {
                AppError::EmbeddingUnavailable(e.to_string())
            }
            RankingError::Index(e) => AppError::IndexUnavailable(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::IndexUnavailable(msg) => {
                tracing::error!("Vector index error: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "INDEX_UNAVAILABLE",
                    "The candidate index is unavailable".to_string(),
                )
            }
            AppError::EmbeddingUnavailable(msg) => {
                tracing::error!("Embedding error: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "EMBEDDING_UNAVAILABLE",
                    "The embedding provider is unavailable".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
