//! Document chunking: per-page character splitting with overlap.

pub mod splitter;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkMetadata, TextSegment};

/// Chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

impl ChunkParams {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Configuration("chunk_size must be at least 1".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Split every segment of a document into chunks, numbering them in order
/// across segments.
pub fn chunk_document(
    document_id: Uuid,
    segments: &[TextSegment],
    params: &ChunkParams,
) -> Result<Vec<Chunk>> {
    params.validate()?;

    let mut chunks = Vec::new();
    for segment in segments {
        for span in splitter::split_text(&segment.text, params) {
            chunks.push(Chunk {
                document_id,
                sequence_index: chunks.len(),
                text: span.text,
                metadata: ChunkMetadata {
                    page_number: segment.page_number,
                    source: segment.source.clone(),
                    start_offset: span.start,
                    end_offset: span.end,
                },
            });
        }
    }

    Ok(chunks)
}
