use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::index::SimilarityIndex;
use crate::models::{IngestionOptions, PdfChunk};
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle of one batch inside [`BatchIndexBuilder::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Embedding { attempt: usize },
    Retry { attempt: usize },
    Success,
    Failed,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Embedding { attempt } => write!(f, "embedding(attempt {attempt})"),
            Self::Retry { attempt } => write!(f, "retry(after attempt {attempt})"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Embeds chunks in fixed-size batches, one batch at a time, retrying a failed batch as a
/// whole with a fixed delay.
pub struct BatchIndexBuilder<E> {
    embedder: E,
    batch_size: usize,
    max_retries: usize,
    retry_delay: Duration,
}

impl<E: Embedder> BatchIndexBuilder<E> {
    pub fn new(embedder: E, options: &IngestionOptions) -> Self {
        Self {
            embedder,
            batch_size: options.batch_size.max(1),
            max_retries: options.max_retries.max(1),
            retry_delay: options.retry_delay,
        }
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Builds one index from `chunks`, preserving their order.
    ///
    /// Returns `Ok(None)` for an empty input. A batch that fails `max_retries` times aborts
    /// the build with [`IngestError::BatchFailed`] and nothing built so far is returned.
    pub fn build(&self, chunks: &[PdfChunk]) -> Result<Option<SimilarityIndex>, IngestError> {
        let total_batches = chunks.len().div_ceil(self.batch_size);
        let mut cumulative: Option<SimilarityIndex> = None;

        for (position, batch) in chunks.chunks(self.batch_size).enumerate() {
            let number = position + 1;
            let batch_index = self.build_batch(number, total_batches, batch)?;

            match cumulative.as_mut() {
                None => cumulative = Some(batch_index),
                Some(index) => index.merge_from(batch_index)?,
            }
        }

        Ok(cumulative)
    }

    fn build_batch(
        &self,
        number: usize,
        total_batches: usize,
        batch: &[PdfChunk],
    ) -> Result<SimilarityIndex, IngestError> {
        let texts = batch.iter().map(|chunk| chunk.text.as_str()).collect::<Vec<_>>();
        let mut state = BatchState::Pending;
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            state = match state {
                BatchState::Pending | BatchState::Retry { .. } => BatchState::Embedding { attempt },
                other => other,
            };
            debug!(batch = number, total_batches, %state, "embedding batch");

            let result = self
                .embedder
                .embed_batch(&texts)
                .and_then(|vectors| {
                    SimilarityIndex::from_embeddings(self.embedder.model_name(), batch, vectors)
                });

            match result {
                Ok(index) => {
                    state = BatchState::Success;
                    info!(
                        batch = number,
                        total_batches,
                        chunks = batch.len(),
                        attempt,
                        %state,
                        "batch indexed"
                    );
                    return Ok(index);
                }
                Err(source) => {
                    warn!(
                        batch = number,
                        attempt,
                        max_retries = self.max_retries,
                        error = %source,
                        "batch processing failed (attempt {attempt}/{})",
                        self.max_retries
                    );

                    if attempt >= self.max_retries {
                        state = BatchState::Failed;
                        error!(
                            batch = number,
                            %state,
                            "failed to process batch after {} attempts",
                            self.max_retries
                        );
                        return Err(IngestError::BatchFailed {
                            batch: number,
                            attempts: attempt,
                            source: Box::new(source),
                        });
                    }

                    state = BatchState::Retry { attempt };
                    info!(batch = number, %state, delay = ?self.retry_delay, "waiting before retrying");
                    thread::sleep(self.retry_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::cell::RefCell;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingEmbedder {
        calls: RefCell<Vec<usize>>,
        fail_first: usize,
        always_fail: bool,
    }

    impl Embedder for RecordingEmbedder {
        fn model_name(&self) -> &str {
            "recording"
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IngestError> {
            let mut calls = self.calls.borrow_mut();
            calls.push(texts.len());
            if self.always_fail || calls.len() <= self.fail_first {
                return Err(IngestError::Embedding("rate limited".to_string()));
            }
            Ok(texts.iter().map(|text| vec![text.len() as f32, 1.0]).collect())
        }
    }

    fn chunks(count: usize) -> Vec<PdfChunk> {
        (0..count)
            .map(|index| PdfChunk {
                chunk_id: format!("id-{index}"),
                fingerprint: format!("fp-{index}"),
                source: "a.pdf".to_string(),
                source_path: "/in/a.pdf".to_string(),
                page: 1,
                chunk_index: index as u32,
                text: format!("chunk number {index}"),
                processed_at: Utc::now(),
            })
            .collect()
    }

    fn options(batch_size: usize, max_retries: usize, retry_delay: Duration) -> IngestionOptions {
        IngestionOptions {
            batch_size,
            max_retries,
            retry_delay,
            ..IngestionOptions::default()
        }
    }

    #[test]
    fn five_chunks_in_batches_of_two() -> Result<(), IngestError> {
        let builder = BatchIndexBuilder::new(
            RecordingEmbedder::default(),
            &options(2, 3, Duration::ZERO),
        );

        let index = builder.build(&chunks(5))?.expect("index for non-empty input");

        assert_eq!(*builder.embedder().calls.borrow(), vec![2, 2, 1]);
        assert_eq!(index.len(), 5);
        let ids: Vec<_> = index
            .entries()
            .iter()
            .map(|entry| entry.chunk.chunk_id.as_str())
            .collect();
        assert_eq!(ids, vec!["id-0", "id-1", "id-2", "id-3", "id-4"]);
        Ok(())
    }

    #[test]
    fn empty_input_builds_nothing() -> Result<(), IngestError> {
        let builder = BatchIndexBuilder::new(
            RecordingEmbedder::default(),
            &options(2, 3, Duration::ZERO),
        );
        assert!(builder.build(&[])?.is_none());
        assert!(builder.embedder().calls.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn transient_failure_is_retried() -> Result<(), IngestError> {
        let embedder = RecordingEmbedder {
            fail_first: 2,
            ..RecordingEmbedder::default()
        };
        let builder = BatchIndexBuilder::new(embedder, &options(50, 3, Duration::ZERO));

        let index = builder.build(&chunks(3))?.expect("index after retry");

        assert_eq!(builder.embedder().calls.borrow().len(), 3);
        assert_eq!(index.len(), 3);
        Ok(())
    }

    #[test]
    fn persistent_failure_stops_after_exactly_max_retries() {
        let embedder = RecordingEmbedder {
            always_fail: true,
            ..RecordingEmbedder::default()
        };
        let delay = Duration::from_millis(20);
        let builder = BatchIndexBuilder::new(embedder, &options(50, 3, delay));

        let started = Instant::now();
        let result = builder.build(&chunks(4));
        let elapsed = started.elapsed();

        assert_eq!(builder.embedder().calls.borrow().len(), 3);
        assert!(elapsed >= delay * 2);
        match result {
            Err(IngestError::BatchFailed { batch, attempts, .. }) => {
                assert_eq!(batch, 1);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected batch failure, got {other:?}"),
        }
    }

    #[test]
    fn later_batch_failure_discards_earlier_batches() {
        struct FailsSecondBatch {
            calls: RefCell<usize>,
        }

        impl Embedder for FailsSecondBatch {
            fn model_name(&self) -> &str {
                "flaky"
            }

            fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IngestError> {
                *self.calls.borrow_mut() += 1;
                if *self.calls.borrow() > 1 {
                    return Err(IngestError::Embedding("timeout".to_string()));
                }
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
        }

        let builder = BatchIndexBuilder::new(
            FailsSecondBatch {
                calls: RefCell::new(0),
            },
            &options(2, 2, Duration::ZERO),
        );

        let result = builder.build(&chunks(4));
        assert!(matches!(result, Err(IngestError::BatchFailed { batch: 2, .. })));
    }
}
