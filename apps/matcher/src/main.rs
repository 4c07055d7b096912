mod config;
mod embedding;
mod errors;
mod index;
mod ingestion;
mod queue;
mod ranking;
mod routes;
mod state;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, EmbeddingBackend, IndexBackend, QueueBackend};
use crate::embedding::{EmbeddingProvider, HashEmbeddingProvider, HttpEmbeddingProvider};
use crate::index::handle::{InMemoryConnector, QdrantConnector};
use crate::index::memory::InMemoryStore;
use crate::index::{CollectionSpec, IndexHandle};
use crate::ingestion::chunker::FixedSizeChunker;
use crate::ingestion::extractor::ResumeExtractor;
use crate::ingestion::pool::WorkerPool;
use crate::ingestion::worker::IngestionWorker;
use crate::queue::{InMemoryQueue, JobQueue, RedisQueue};
use crate::ranking::CandidateRanker;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting matcher v{}", env!("CARGO_PKG_VERSION"));

    // Initialize embedding provider
    let embedder = build_embedder(&config)?;
    info!(
        "Embedding provider initialized ({:?}, model: {}, dimension: {})",
        config.embedding_backend,
        config.embedding_model,
        embedder.dimensions()
    );

    // Vector index handle, connected lazily and shared by workers and routes
    let index = Arc::new(build_index(&config, embedder)?);
    {
        let index = index.clone();
        tokio::spawn(async move {
            if let Err(e) = index.get().await {
                warn!("Vector index not ready yet, will retry on first use: {e}");
            }
        });
    }

    // Initialize upload queue
    let queue = build_queue(&config).await?;
    info!(
        "Upload queue initialized ({:?}, {}, lease {:?})",
        config.queue_backend,
        config.queue_name,
        queue.lease()
    );

    // Ingestion worker pool
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = Arc::new(IngestionWorker::new(
        Arc::new(ResumeExtractor),
        FixedSizeChunker::new(config.chunker),
        index.clone(),
        config.reindex_policy,
    ));
    let pool = WorkerPool::new(
        queue,
        worker,
        config.retry.clone(),
        config.worker_concurrency,
    );
    let pool_task = tokio::spawn(pool.run(shutdown_rx));

    // Build app state
    let state = AppState {
        config: config.clone(),
        ranker: Arc::new(CandidateRanker::new(index.clone(), config.rank_default_k)),
        index,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop taking jobs and let in-flight ones finish
    shutdown_tx.send(true).ok();
    pool_task.await.context("worker pool task panicked")?;
    info!("Shutdown complete");

    Ok(())
}

fn build_embedder(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.embedding_backend {
        EmbeddingBackend::Http => {
            let url = config
                .embedding_url
                .clone()
                .context("EMBEDDING_URL is required for the http embedding backend")?;
            Arc::new(HttpEmbeddingProvider::new(
                url,
                config.embedding_model.clone(),
                config.embedding_api_key.clone(),
                config.embedding_dimension,
            )?)
        }
        EmbeddingBackend::Hash => {
            warn!("Using the hash embedding backend; rankings are lexical only");
            Arc::new(HashEmbeddingProvider::new(config.embedding_dimension)?)
        }
    };
    Ok(embedder)
}

fn build_index(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<IndexHandle> {
    let spec = CollectionSpec::cosine(config.collection_name.clone(), config.embedding_dimension);
    let handle = match config.index_backend {
        IndexBackend::Qdrant => IndexHandle::new(QdrantConnector {
            url: config
                .qdrant_url
                .clone()
                .context("QDRANT_URL is required for the qdrant index backend")?,
            api_key: config.qdrant_api_key.clone(),
            embedder,
            spec,
        }),
        IndexBackend::Memory => {
            warn!("Using the in-memory vector index; indexed resumes are lost on restart");
            IndexHandle::new(InMemoryConnector {
                store: Arc::new(InMemoryStore::new()),
                embedder,
                spec,
            })
        }
    };
    Ok(handle)
}

async fn build_queue(config: &Config) -> Result<Arc<dyn JobQueue>> {
    let queue: Arc<dyn JobQueue> = match config.queue_backend {
        QueueBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .context("REDIS_URL is required for the redis queue backend")?;
            Arc::new(
                RedisQueue::connect(url, &config.queue_name)
                    .await
                    .context("failed to connect to the upload queue")?
                    .with_lease(config.job_lease),
            )
        }
        QueueBackend::Memory => {
            warn!("Using the in-memory upload queue; jobs are lost on restart");
            Arc::new(InMemoryQueue::new().with_lease(config.job_lease))
        }
    };
    Ok(queue)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
