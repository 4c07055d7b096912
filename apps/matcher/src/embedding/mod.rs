//! Embedding providers: text in, fixed-length vector out.
//!
//! The index holds an `Arc<dyn EmbeddingProvider>`, chosen at startup from
//! config (`EMBEDDING_BACKEND`).

pub mod hash;
pub mod http;

use async_trait::async_trait;
use thiserror::Error;

pub use hash::HashEmbeddingProvider;
pub use http::HttpEmbeddingProvider;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("embedding service unavailable after {retries} retries")]
    Exhausted { retries: u32 },

    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("expected {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid embedding configuration: {0}")]
    Config(String),
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of texts, returning one vector per input in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;
}

/// Scales `v` to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0; 4];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);
    }
}
