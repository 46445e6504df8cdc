use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::{IngestionOptions, PdfChunk, SourceDocument};
use crate::normalizer::{fingerprint, normalize_text};
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::collections::VecDeque;

/// Paragraph, line, sentence, word, then character boundaries.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

/// Splits text on the coarsest separator present and recurses into pieces that are still
/// too long, then merges neighbouring pieces back up to `max_chars` with a trailing overlap.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    config: ChunkingConfig,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        if config.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if config.overlap_chars >= config.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                config.overlap_chars, config.max_chars
            )));
        }

        Ok(Self {
            config,
            separators: DEFAULT_SEPARATORS.iter().map(|sep| sep.to_string()).collect(),
        })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut finer: &[String] = &[];
        for (position, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate.as_str();
                finer = &separators[position + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut pending = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.config.max_chars {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }

            if finer.is_empty() {
                push_trimmed(&mut chunks, &piece);
            } else {
                chunks.extend(self.split_with(&piece, finer));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }

        chunks
    }

    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let ChunkingConfig {
            max_chars,
            overlap_chars,
        } = self.config;

        let mut merged = Vec::new();
        let mut window: VecDeque<Cow<'_, str>> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > max_chars && !window.is_empty() {
                let chunk = window.iter().map(|part| part.as_ref()).collect::<String>();
                push_trimmed(&mut merged, &chunk);

                while total > overlap_chars || (total + len > max_chars && total > 0) {
                    let Some(front) = window.pop_front() else {
                        break;
                    };
                    total -= char_len(&front);
                }

                // Whole pieces longer than the overlap leave too little behind.
                if total < overlap_chars {
                    let budget = overlap_chars.min(max_chars.saturating_sub(len));
                    let tail = overlap_tail(chunk.trim(), budget);
                    let tail_len = char_len(tail);
                    if tail_len > total {
                        window.clear();
                        window.push_back(Cow::Owned(tail.to_string()));
                        total = tail_len;
                    }
                }
            }

            window.push_back(Cow::Borrowed(piece.as_str()));
            total += len;
        }

        push_trimmed(
            &mut merged,
            &window.iter().map(|part| part.as_ref()).collect::<String>(),
        );
        merged
    }
}

/// The last `budget` characters of `text`, moved forward to the next word start when the
/// cut lands inside a word.
fn overlap_tail(text: &str, budget: usize) -> &str {
    let len = char_len(text);
    if len <= budget {
        return text;
    }

    let start = text
        .char_indices()
        .nth(len - budget)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len());
    let tail = &text[start..];
    let mid_word = text[..start]
        .chars()
        .next_back()
        .is_some_and(|ch| !ch.is_whitespace());
    if !mid_word {
        return tail.trim_start();
    }

    match tail.find(char::is_whitespace) {
        Some(offset) => tail[offset..].trim_start(),
        None => tail,
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn push_trimmed(target: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        target.push(trimmed.to_string());
    }
}

/// Separators stay attached to the start of the piece that follows them.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut parts = text.split(separator);
    let mut pieces = Vec::new();
    if let Some(first) = parts.next() {
        pieces.push(first.to_string());
    }
    pieces.extend(parts.map(|part| format!("{separator}{part}")));
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

/// Normalizes one page and splits it into chunks carrying the page's metadata.
///
/// Overlap never crosses into the next page.
pub fn build_page_chunks(
    document: &SourceDocument,
    page: &PageText,
    splitter: &RecursiveSplitter,
    processed_at: DateTime<Utc>,
) -> Vec<PdfChunk> {
    let normalized = normalize_text(&page.text);

    splitter
        .split(&normalized.text)
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let fingerprint = fingerprint(&text);
            PdfChunk {
                chunk_id: make_chunk_id(&document.file_name, page.number, &fingerprint),
                fingerprint,
                source: document.file_name.clone(),
                source_path: document.path.to_string_lossy().to_string(),
                page: page.number,
                chunk_index: index as u32,
                text,
                processed_at,
            }
        })
        .collect()
}

fn make_chunk_id(source: &str, page: u32, fingerprint: &str) -> String {
    crate::normalizer::fingerprint(&format!("{source}-{page}-{fingerprint}"))
}
