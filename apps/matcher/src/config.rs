use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::ingestion::chunker::ChunkerConfig;
use crate::ingestion::worker::ReindexPolicy;
use crate::queue::retry::RetryPolicy;
use crate::ranking::MAX_K;

/// Which embedding backend the service talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    Http,
    /// Deterministic local hashing, no network. Development only.
    Hash,
}

impl FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "hash" => Ok(Self::Hash),
            other => bail!("EMBEDDING_BACKEND must be 'http' or 'hash', got '{other}'"),
        }
    }
}

/// Where the Upload Queue lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Redis,
    /// In-process queue; jobs are lost on restart. Single-process development only.
    Memory,
}

impl FromStr for QueueBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => bail!("QUEUE_BACKEND must be 'redis' or 'memory', got '{other}'"),
        }
    }
}

/// Where resume chunks are indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    Qdrant,
    /// Brute-force in-process store; emptied on restart.
    Memory,
}

impl FromStr for IndexBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            other => bail!("INDEX_BACKEND must be 'qdrant' or 'memory', got '{other}'"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub queue_backend: QueueBackend,
    /// Set whenever `queue_backend` is `Redis`.
    pub redis_url: Option<String>,
    pub index_backend: IndexBackend,
    /// Set whenever `index_backend` is `Qdrant`.
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub collection_name: String,
    pub embedding_backend: EmbeddingBackend,
    pub embedding_url: Option<String>,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
    pub embedding_dimension: usize,
    pub chunker: ChunkerConfig,
    pub queue_name: String,
    pub worker_concurrency: usize,
    /// How long a reserved job stays invisible to stalled-job recovery
    /// without a heartbeat.
    pub job_lease: Duration,
    pub retry: RetryPolicy,
    pub reindex_policy: ReindexPolicy,
    pub rank_default_k: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let embedding_backend: EmbeddingBackend = env_or("EMBEDDING_BACKEND", EmbeddingBackend::Http)?;
        let embedding_url = optional_env("EMBEDDING_URL");
        if embedding_backend == EmbeddingBackend::Http && embedding_url.is_none() {
            bail!("Required environment variable 'EMBEDDING_URL' is not set (EMBEDDING_BACKEND=http)");
        }

        let queue_backend: QueueBackend = env_or("QUEUE_BACKEND", QueueBackend::Redis)?;
        let redis_url = optional_env("REDIS_URL");
        if queue_backend == QueueBackend::Redis && redis_url.is_none() {
            bail!("Required environment variable 'REDIS_URL' is not set (QUEUE_BACKEND=redis)");
        }

        let index_backend: IndexBackend = env_or("INDEX_BACKEND", IndexBackend::Qdrant)?;
        let qdrant_url = optional_env("QDRANT_URL");
        if index_backend == IndexBackend::Qdrant && qdrant_url.is_none() {
            bail!("Required environment variable 'QDRANT_URL' is not set (INDEX_BACKEND=qdrant)");
        }

        let chunker = ChunkerConfig::builder()
            .chunk_size(env_or("CHUNK_SIZE", 300)?)
            .chunk_overlap(env_or("CHUNK_OVERLAP", 0)?)
            .build()
            .context("invalid chunker configuration")?;

        let worker_concurrency: usize = env_or("WORKER_CONCURRENCY", 5)?;
        if worker_concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be greater than zero");
        }

        let job_lease_ms: u64 = env_or("JOB_LEASE_MS", 30_000)?;
        if job_lease_ms == 0 {
            bail!("JOB_LEASE_MS must be greater than zero");
        }

        let rank_default_k = check_rank_default_k(env_or("RANK_DEFAULT_K", 50)?)?;

        let retry = RetryPolicy {
            max_attempts: env_or("JOB_MAX_ATTEMPTS", 3)?,
            extraction_max_attempts: env_or("EXTRACTION_MAX_ATTEMPTS", 2)?,
            base_backoff: Duration::from_millis(env_or("RETRY_BACKOFF_MS", 1000)?),
            ..RetryPolicy::default()
        };

        Ok(Config {
            queue_backend,
            redis_url,
            index_backend,
            qdrant_url,
            qdrant_api_key: optional_env("QDRANT_API_KEY"),
            collection_name: optional_env("COLLECTION_NAME").unwrap_or_else(|| "resume".to_string()),
            embedding_backend,
            embedding_url,
            embedding_model: optional_env("EMBEDDING_MODEL")
                .unwrap_or_else(|| "sentence-transformers/all-MiniLM-L6-v2".to_string()),
            embedding_api_key: optional_env("EMBEDDING_API_KEY"),
            embedding_dimension: env_or("EMBEDDING_DIMENSION", 384)?,
            chunker,
            queue_name: optional_env("QUEUE_NAME").unwrap_or_else(|| "resume-upload".to_string()),
            worker_concurrency,
            job_lease: Duration::from_millis(job_lease_ms),
            retry,
            reindex_policy: env_or("REINDEX_POLICY", ReindexPolicy::Append)?,
            rank_default_k,
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

#[cfg(test)]
impl Config {
    /// Defaults with the hash embedder and in-process backends.
    pub fn for_tests() -> Self {
        Config {
            queue_backend: QueueBackend::Memory,
            redis_url: None,
            index_backend: IndexBackend::Memory,
            qdrant_url: None,
            qdrant_api_key: None,
            collection_name: "resume".to_string(),
            embedding_backend: EmbeddingBackend::Hash,
            embedding_url: None,
            embedding_model: "hash".to_string(),
            embedding_api_key: None,
            embedding_dimension: 64,
            chunker: ChunkerConfig::default(),
            queue_name: "resume-upload".to_string(),
            worker_concurrency: 5,
            job_lease: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            reindex_policy: ReindexPolicy::Append,
            rank_default_k: 50,
            port: 8080,
            rust_log: "info".to_string(),
        }
    }
}

/// The default `k` must itself be a `k` the ranker accepts.
fn check_rank_default_k(k: usize) -> Result<usize> {
    if !(1..=MAX_K).contains(&k) {
        bail!("RANK_DEFAULT_K must be between 1 and {MAX_K}, got {k}");
    }
    Ok(k)
}

/// Unset and blank variables are both treated as absent.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_or(key, optional_env(key).as_deref(), default)
}

fn parse_or<T>(key: &str, raw: Option<&str>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} has invalid value '{value}': {e}")),
    }
}
