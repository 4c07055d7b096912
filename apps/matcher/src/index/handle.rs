//! Process-wide, lazily initialised index handle.
//!
//! The first caller connects and runs `ensure_collection`; later callers get
//! the cached index. A failed setup caches nothing, so the next caller starts
//! over from scratch.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::embedding::EmbeddingProvider;
use crate::index::memory::InMemoryStore;
use crate::index::qdrant::QdrantStore;
use crate::index::{CollectionSpec, IndexError, ResumeIndex};

/// Builds a connected [`ResumeIndex`]. Called again after every failed setup.
#[async_trait]
pub trait IndexConnector: Send + Sync {
    async fn connect(&self) -> Result<ResumeIndex, IndexError>;
}

pub struct QdrantConnector {
    pub url: String,
    pub api_key: Option<String>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub spec: CollectionSpec,
}

#[async_trait]
impl IndexConnector for QdrantConnector {
    async fn connect(&self) -> Result<ResumeIndex, IndexError> {
        let store = QdrantStore::connect(&self.url, self.api_key.clone())?;
        ResumeIndex::new(Arc::new(store), self.embedder.clone(), self.spec.clone())
    }
}

/// Connects to an existing in-memory store, so data survives handle resets.
pub struct InMemoryConnector {
    pub store: Arc<InMemoryStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub spec: CollectionSpec,
}

#[async_trait]
impl IndexConnector for InMemoryConnector {
    async fn connect(&self) -> Result<ResumeIndex, IndexError> {
        ResumeIndex::new(self.store.clone(), self.embedder.clone(), self.spec.clone())
    }
}

pub struct IndexHandle {
    connector: Box<dyn IndexConnector>,
    cell: OnceCell<Arc<ResumeIndex>>,
}

impl IndexHandle {
    pub fn new(connector: impl IndexConnector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            cell: OnceCell::new(),
        }
    }

    /// Returns the shared index, connecting and ensuring the collection on
    /// first use. Concurrent first callers wait for a single setup attempt.
    pub async fn get(&self) -> Result<Arc<ResumeIndex>, IndexError> {
        self.cell
            .get_or_try_init(|| async {
                let index = self.connector.connect().await?;
                if let Err(e) = index.ensure_collection().await {
                    warn!("vector index setup failed: {e}");
                    return Err(e);
                }
                info!(collection = index.collection(), "vector index handle ready");
                Ok::<_, IndexError>(Arc::new(index))
            })
            .await
            .map(Arc::clone)
    }

    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }
}
