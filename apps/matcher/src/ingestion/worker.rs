use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::bail;
use tracing::{debug, info, warn};

use crate::index::IndexHandle;
use crate::ingestion::chunker::FixedSizeChunker;
use crate::ingestion::extractor::TextExtractor;
use crate::ingestion::models::IngestionJob;
use crate::ingestion::IngestError;

/// What happens to a candidate's existing chunks when a resume is ingested
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReindexPolicy {
    /// Keep old chunks; redelivery produces duplicates.
    #[default]
    Append,
    /// Delete every chunk for the candidate before inserting the new set.
    Replace,
}

impl FromStr for ReindexPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            other => bail!("REINDEX_POLICY must be 'append' or 'replace', got '{other}'"),
        }
    }
}

impl fmt::Display for ReindexPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append => f.write_str("append"),
            Self::Replace => f.write_str("replace"),
        }
    }
}

/// Outcome of one successfully processed resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub candidate_id: String,
    pub chunks_indexed: usize,
    /// False when the source file could not be deleted afterwards.
    pub file_removed: bool,
}

/// Turns one queued resume into indexed chunks.
pub struct IngestionWorker {
    extractor: Arc<dyn TextExtractor>,
    chunker: FixedSizeChunker,
    index: Arc<IndexHandle>,
    reindex: ReindexPolicy,
}

impl IngestionWorker {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        chunker: FixedSizeChunker,
        index: Arc<IndexHandle>,
        reindex: ReindexPolicy,
    ) -> Self {
        Self {
            extractor,
            chunker,
            index,
            reindex,
        }
    }

    /// Decode, extract, chunk, index, then delete the source file.
    ///
    /// The source file is only deleted after the chunks are written; any
    /// earlier failure leaves it in place for the retry.
    pub async fn process_resume(&self, raw: &str) -> Result<IngestReport, IngestError> {
        let job = IngestionJob::decode(raw)?;
        let path = job.file_path.as_path();

        let text = self.extractor.extract(path).await?;
        let chunks = self.chunker.chunk_resume(&text, &job.candidate_id);
        debug!(
            candidate_id = %job.candidate_id,
            chars = text.chars().count(),
            chunks = chunks.len(),
            "resume split into chunks"
        );

        if chunks.is_empty() {
            warn!(
                candidate_id = %job.candidate_id,
                path = %path.display(),
                "no text extracted from resume; nothing to index"
            );
        } else {
            let index = self.index.get().await.map_err(IngestError::IndexSetup)?;
            if self.reindex == ReindexPolicy::Replace {
                index
                    .delete_candidate(&job.candidate_id)
                    .await
                    .map_err(IngestError::IndexWrite)?;
            }
            index
                .add_documents(&chunks)
                .await
                .map_err(IngestError::IndexWrite)?;
        }

        let file_removed = match tokio::fs::remove_file(path).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to delete processed resume");
                false
            }
        };

        info!(
            candidate_id = %job.candidate_id,
            chunks = chunks.len(),
            "resume indexed"
        );
        Ok(IngestReport {
            candidate_id: job.candidate_id,
            chunks_indexed: chunks.len(),
            file_removed,
        })
    }
}
