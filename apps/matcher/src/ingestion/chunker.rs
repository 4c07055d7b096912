//! Fixed-size text chunker.
//!
//! Splits by character count with a configurable overlap. Purely length-based,
//! no sentence or token awareness, and deterministic for the same input.

use thiserror::Error;

use crate::ingestion::models::{ChunkMetadata, ResumeChunk};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkerConfigError {
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,

    #[error("chunk_overlap ({overlap}) must be less than chunk_size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// Validated chunker settings. Only [`ChunkerConfigBuilder::build`] and
/// `Default` produce one, so `0 <= chunk_overlap < chunk_size` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 300,
            chunk_overlap: 0,
        }
    }
}

impl ChunkerConfig {
    pub fn builder() -> ChunkerConfigBuilder {
        ChunkerConfigBuilder::default()
    }

    /// Maximum characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters shared between consecutive chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkerConfigBuilder {
    config: ChunkerConfig,
}

impl ChunkerConfigBuilder {
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    pub fn build(self) -> Result<ChunkerConfig, ChunkerConfigError> {
        let ChunkerConfig {
            chunk_size,
            chunk_overlap,
        } = self.config;
        if chunk_size == 0 {
            return Err(ChunkerConfigError::ZeroChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkerConfigError::OverlapTooLarge {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(self.config)
    }
}

#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    config: ChunkerConfig,
}

impl FixedSizeChunker {
    /// Takes a config produced by [`ChunkerConfigBuilder::build`], so
    /// `chunk_overlap < chunk_size` holds.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    /// Splits `text` into chunks of at most `chunk_size` characters. The last
    /// chunk holds whatever remains. Empty input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let size = self.config.chunk_size;
        let step = size - self.config.chunk_overlap;
        let mut chunks = Vec::with_capacity(chars.len() / step + 1);
        let mut start = 0;

        loop {
            let end = (start + size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }

        chunks
    }

    /// Splits a resume and tags every piece with its candidate and position.
    pub fn chunk_resume(&self, text: &str, candidate_id: &str) -> Vec<ResumeChunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| ResumeChunk {
                text,
                metadata: ChunkMetadata {
                    candidate_id: candidate_id.to_string(),
                    chunk_index,
                },
            })
            .collect()
    }
}
