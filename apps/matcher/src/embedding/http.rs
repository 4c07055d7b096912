//! HTTP embedding client for OpenAI-compatible `/v1/embeddings` endpoints
//! (OpenAI, text-embeddings-inference, Ollama, vLLM).
//!
//! Retries on 429 and 5xx with exponential backoff. Every response is checked
//! for count and dimensionality before it reaches the index.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::{EmbeddingError, EmbeddingProvider};

const MAX_RETRIES: u32 = 3;
const MAX_BATCH: usize = 64;
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Result<Self, EmbeddingError> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(EmbeddingError::Config(format!(
                "embedding URL must be an http(s) URL, got '{url}'"
            )));
        }
        if dimensions == 0 {
            return Err(EmbeddingError::Config(
                "dimension must be greater than zero".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            url,
            model: model.into(),
            api_key,
            dimensions,
        })
    }

    async fn embed_chunk(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut last_error: Option<EmbeddingError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "embedding call attempt {} failed, retrying after {}ms",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&self.url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(EmbeddingError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("embedding API returned {}: {}", status, body);
                last_error = Some(EmbeddingError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(EmbeddingError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: EmbeddingResponse = response.json().await?;
            let vectors = into_vectors(parsed, texts.len(), self.dimensions)?;
            debug!(count = vectors.len(), model = %self.model, "embedded batch");
            return Ok(vectors);
        }

        Err(last_error.unwrap_or(EmbeddingError::Exhausted {
            retries: MAX_RETRIES,
        }))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            vectors.extend(self.embed_chunk(batch).await?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Orders response rows by their `index` field (servers may reorder) and
/// validates count and dimensionality.
fn into_vectors(
    response: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut data = response.data;
    if data.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: data.len(),
        });
    }
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }

    data.into_iter()
        .map(|d| {
            if d.embedding.len() == dimensions {
                Ok(d.embedding)
            } else {
                Err(EmbeddingError::DimensionMismatch {
                    expected: dimensions,
                    actual: d.embedding.len(),
                })
            }
        })
        .collect()
}
