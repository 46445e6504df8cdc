use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac, TimestampSecondsWithFrac};
use std::path::PathBuf;
use std::time::Duration;

/// One source PDF as discovered by the directory walk.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub file_name: String,
    pub byte_size: u64,
    pub modified: DateTime<Utc>,
    /// Pages reported by the extractor, blank ones included. Zero until extracted.
    pub page_count: u32,
}

/// Unit of embedding and indexing. Immutable once built by the splitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PdfChunk {
    pub chunk_id: String,
    pub fingerprint: String,
    pub source: String,
    pub source_path: String,
    pub page: u32,
    pub chunk_index: u32,
    pub text: String,
    pub processed_at: DateTime<Utc>,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingStats {
    pub total_pdfs: usize,
    pub processed_pdfs: usize,
    pub total_pages: usize,
    /// Chunks added to the index by this run. Chunks already indexed by an earlier run are
    /// not counted, so a re-run over unchanged PDFs reports zero.
    pub total_chunks: usize,
    #[serde_as(as = "TimestampSecondsWithFrac<f64>")]
    pub start_time: DateTime<Utc>,
    #[serde_as(as = "TimestampSecondsWithFrac<f64>")]
    pub end_time: DateTime<Utc>,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub processing_time: Duration,
}

impl ProcessingStats {
    pub fn begin(total_pdfs: usize) -> Self {
        let now = Utc::now();
        Self {
            total_pdfs,
            processed_pdfs: 0,
            total_pages: 0,
            total_chunks: 0,
            start_time: now,
            end_time: now,
            processing_time: Duration::ZERO,
        }
    }

    pub fn finish(&mut self) {
        self.end_time = Utc::now();
        self.processing_time = (self.end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
    pub score_threshold: f32,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            top_k: 3,
            score_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: f32,
    pub chunk: PdfChunk,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub min_page_chars: usize,
    pub batch_size: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
    /// Accumulated chunk count that triggers a flush to the on-disk index.
    pub checkpoint_chunks: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 3_000,
            chunk_overlap_chars: 200,
            min_page_chars: 10,
            batch_size: 50,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            checkpoint_chunks: 250,
        }
    }
}

impl IngestionOptions {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap_chars >= self.chunk_max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.chunk_overlap_chars, self.chunk_max_chars
            )));
        }
        if self.batch_size == 0 {
            return Err(IngestError::InvalidArgument(
                "batch size must be positive".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(IngestError::InvalidArgument(
                "max retries must be at least 1".to_string(),
            ));
        }
        if self.checkpoint_chunks == 0 {
            return Err(IngestError::InvalidArgument(
                "checkpoint size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
