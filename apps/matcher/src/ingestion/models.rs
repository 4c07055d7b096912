use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ingestion::IngestError;

/// One uploaded resume waiting to be indexed.
///
/// Wire format is `{"filePath": "...", "candidateId": "..."}`, the same object
/// the upload handler enqueues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJob {
    pub file_path: PathBuf,
    pub candidate_id: String,
}

impl IngestionJob {
    pub fn new(file_path: impl Into<PathBuf>, candidate_id: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            candidate_id: candidate_id.into(),
        }
    }

    /// Decodes and validates a raw queue payload. Nothing is touched on disk
    /// or in the index before this succeeds.
    pub fn decode(raw: &str) -> Result<Self, IngestError> {
        let job: IngestionJob = serde_json::from_str(raw)
            .map_err(|e| IngestError::Malformed(format!("payload is not a valid job: {e}")))?;
        job.validate()?;
        Ok(job)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.file_path.as_os_str().is_empty() {
            return Err(IngestError::Malformed("filePath is empty".to_string()));
        }
        if self.candidate_id.trim().is_empty() {
            return Err(IngestError::Malformed("candidateId is empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub candidate_id: String,
    /// Zero-based position within the source document.
    pub chunk_index: usize,
}

/// A slice of a resume's text, the unit stored in the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl ResumeChunk {
    pub fn candidate_id(&self) -> &str {
        &self.metadata.candidate_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_camel_case_payload() {
        let job = IngestionJob::decode(r#"{"filePath":"/tmp/r1.pdf","candidateId":"cand-1"}"#)
            .unwrap();
        assert_eq!(job, IngestionJob::new("/tmp/r1.pdf", "cand-1"));
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let job = IngestionJob::decode(
            r#"{"filePath":"/tmp/r1.pdf","candidateId":"cand-1","uploadedBy":"x"}"#,
        )
        .unwrap();
        assert_eq!(job.candidate_id, "cand-1");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = IngestionJob::decode("not json").unwrap_err();
        assert!(matches!(err, IngestError::Malformed(_)));
    }

    #[test]
    fn test_decode_rejects_missing_candidate() {
        let err = IngestionJob::decode(r#"{"filePath":"/tmp/r1.pdf"}"#).unwrap_err();
        assert!(matches!(err, IngestError::Malformed(_)));
    }

    #[test]
    fn test_decode_rejects_empty_file_path() {
        let err = IngestionJob::decode(r#"{"filePath":"","candidateId":"cand-1"}"#).unwrap_err();
        assert!(err.to_string().contains("filePath"));
    }

    #[test]
    fn test_encode_uses_wire_field_names() {
        let raw = IngestionJob::new("/tmp/a.pdf", "c").encode().unwrap();
        assert!(raw.contains("\"filePath\""));
        assert!(raw.contains("\"candidateId\""));
    }

    #[test]
    fn test_chunk_metadata_wire_names() {
        let chunk = ResumeChunk {
            text: "Rust".to_string(),
            metadata: ChunkMetadata {
                candidate_id: "cand-1".to_string(),
                chunk_index: 2,
            },
        };
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["metadata"]["candidateId"], "cand-1");
        assert_eq!(value["metadata"]["chunkIndex"], 2);
    }
}
