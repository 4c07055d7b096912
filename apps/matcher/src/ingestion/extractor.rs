//! Text extraction for uploaded resumes.
//!
//! PDF parsing is CPU-bound and runs on the blocking pool so a large or
//! pathological document never stalls other jobs on the async executor.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("source file {path} does not exist")]
    Missing { path: PathBuf },

    #[error("source file {path} could not be read: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document {path} could not be parsed: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("unsupported document type: {path}")]
    Unsupported { path: PathBuf },
}

/// Converts a stored document into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

/// Default extractor: PDF via `pdf-extract`, plus plain text and markdown.
/// PDFs are recognised by their header, so uploads saved without an
/// extension still work; other types go by extension. Anything else is
/// rejected as unsupported.
pub struct ResumeExtractor;

#[async_trait]
impl TextExtractor for ResumeExtractor {
    async fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = read_source(path).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "read resume source");

        let kind = DocumentKind::sniff(&bytes)
            .or_else(|| DocumentKind::from_path(path))
            .ok_or_else(|| ExtractError::Unsupported {
                path: path.to_path_buf(),
            })?;

        let raw = match kind {
            DocumentKind::Pdf => extract_pdf(path, bytes).await?,
            DocumentKind::PlainText => {
                String::from_utf8(bytes).map_err(|e| ExtractError::Corrupt {
                    path: path.to_path_buf(),
                    message: format!("not valid UTF-8: {e}"),
                })?
            }
        };

        Ok(normalize_text(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentKind {
    Pdf,
    PlainText,
}

const PDF_MAGIC: &[u8] = b"%PDF-";

impl DocumentKind {
    fn sniff(bytes: &[u8]) -> Option<Self> {
        bytes.starts_with(PDF_MAGIC).then_some(Self::Pdf)
    }

    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" | "md" => Some(Self::PlainText),
            _ => None,
        }
    }
}

async fn read_source(path: &Path) -> Result<Vec<u8>, ExtractError> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ExtractError::Missing {
            path: path.to_path_buf(),
        },
        _ => ExtractError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        },
    })
}

async fn extract_pdf(path: &Path, bytes: Vec<u8>) -> Result<String, ExtractError> {
    // pdf-extract can panic on malformed input; a panicked task surfaces as a
    // JoinError and is reported the same way as a parse error.
    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| ExtractError::Corrupt {
            path: path.to_path_buf(),
            message: format!("extraction task failed: {e}"),
        })?
        .map_err(|e| ExtractError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Trims trailing whitespace on every line, collapses runs of blank lines to
/// one, and trims the document. PDF text output is full of both.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0;

    for line in raw.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_normalize_collapses_blank_lines() {
        let raw = "Jane Doe   \n\n\n\nExperience\t\n  Rust  \n\n";
        assert_eq!(normalize_text(raw), "Jane Doe\n\nExperience\n  Rust");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize_text("  \n\n \n"), "");
    }

    #[test]
    fn test_document_kind_by_extension() {
        assert_eq!(DocumentKind::from_path(Path::new("/tmp/r1.PDF")), Some(DocumentKind::Pdf));
        assert_eq!(
            DocumentKind::from_path(Path::new("cv.txt")),
            Some(DocumentKind::PlainText)
        );
        assert_eq!(DocumentKind::from_path(Path::new("cv.docx")), None);
        assert_eq!(DocumentKind::from_path(Path::new("upload")), None);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ResumeExtractor
            .extract(&dir.path().join("gone.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Missing { .. }));
    }

    #[tokio::test]
    async fn test_plain_text_extraction() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        write!(file, "Jane Doe\n\n\n\nRust engineer   \n").unwrap();

        let text = ResumeExtractor.extract(file.path()).await.unwrap();
        assert_eq!(text, "Jane Doe\n\nRust engineer");
    }

    #[tokio::test]
    async fn test_corrupt_pdf() {
        let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        file.write_all(b"this is definitely not a pdf").unwrap();

        let err = ResumeExtractor.extract(file.path()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Corrupt { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".docx").tempfile().unwrap();
        let err = ResumeExtractor.extract(file.path()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported { .. }));
    }

    #[test]
    fn test_pdf_header_wins_over_extension() {
        assert_eq!(DocumentKind::sniff(b"%PDF-1.7\n%\xe2\xe3"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::sniff(b"Jane Doe"), None);
        assert_eq!(DocumentKind::sniff(b""), None);
    }

    #[tokio::test]
    async fn test_extensionless_pdf_is_parsed_as_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("3f9a1c0d2b7e");
        std::fs::write(&path, b"%PDF-1.4\nnot really a document").unwrap();

        let err = ResumeExtractor.extract(&path).await.unwrap_err();
        assert!(matches!(err, ExtractError::Corrupt { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_extensionless_non_pdf_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("3f9a1c0d2b7e");
        std::fs::write(&path, b"PK\x03\x04").unwrap();

        let err = ResumeExtractor.extract(&path).await.unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported { .. }));
    }
}
