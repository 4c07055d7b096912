//! FNV-1a hashing embedder.
//!
//! Deterministic bag-of-words vectors with no model and no network. Captures
//! lexical overlap only, so it is meant for local development and tests.

use async_trait::async_trait;

use crate::embedding::{l2_normalize, EmbeddingError, EmbeddingProvider};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;
const MIN_TOKEN_LEN: usize = 2;

#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::Config(
                "dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let index = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 1 { 1.0 } else { -1.0 };
            embedding[index] += sign;
        }
        l2_normalize(&mut embedding);
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .map(str::to_lowercase)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_dimension_and_unit_length() {
        let embedder = HashEmbeddingProvider::new(384).unwrap();
        let v = embedder.embed_sync("Senior Rust engineer, distributed systems");
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_deterministic() {
        let embedder = HashEmbeddingProvider::new(64).unwrap();
        assert_eq!(embedder.embed_sync("kafka"), embedder.embed_sync("kafka"));
    }

    #[test]
    fn test_case_insensitive() {
        let embedder = HashEmbeddingProvider::new(64).unwrap();
        assert_eq!(embedder.embed_sync("Rust"), embedder.embed_sync("rust"));
    }

    #[test]
    fn test_overlapping_text_scores_higher() {
        let embedder = HashEmbeddingProvider::new(384).unwrap();
        let query = embedder.embed_sync("rust tokio async networking");
        let close = embedder.embed_sync("built async networking services in rust with tokio");
        let far = embedder.embed_sync("watercolor painting and pottery classes");
        assert!(cosine(&query, &close) > cosine(&query, &far));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashEmbeddingProvider::new(0).is_err());
    }

    #[tokio::test]
    async fn test_embed_single() {
        let embedder = HashEmbeddingProvider::new(16).unwrap();
        let v = embedder.embed("golang").await.unwrap();
        assert_eq!(v, embedder.embed_sync("golang"));
    }
}
