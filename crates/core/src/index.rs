use crate::error::IngestError;
use crate::models::{PdfChunk, SearchHit};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub chunk: PdfChunk,
}

/// Flat similarity index over L2-normalized vectors, so inner product equals cosine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityIndex {
    pub model: String,
    pub dimensions: usize,
    entries: Vec<IndexEntry>,
}

impl SimilarityIndex {
    pub fn from_embeddings(
        model: impl Into<String>,
        chunks: &[PdfChunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IngestError> {
        if chunks.len() != vectors.len() {
            return Err(IngestError::Embedding(format!(
                "embedding count {} doesn't match chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }

        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        if chunks.is_empty() || dimensions == 0 {
            return Err(IngestError::InvalidArgument(
                "cannot build an index from an empty batch".to_string(),
            ));
        }

        let entries = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, mut vector)| {
                if vector.len() != dimensions {
                    return Err(IngestError::DimensionMismatch {
                        expected: dimensions,
                        found: vector.len(),
                    });
                }
                l2_normalize(&mut vector);
                Ok(IndexEntry {
                    vector,
                    chunk: chunk.clone(),
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        Ok(Self {
            model: model.into(),
            dimensions,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Appends every entry of `other`. Nothing is appended when the dimensions differ.
    pub fn merge_from(&mut self, other: SimilarityIndex) -> Result<(), IngestError> {
        if other.dimensions != self.dimensions {
            return Err(IngestError::DimensionMismatch {
                expected: self.dimensions,
                found: other.dimensions,
            });
        }
        self.entries.extend(other.entries);
        Ok(())
    }

    pub fn fingerprints(&self) -> HashSet<String> {
        self.entries
            .iter()
            .map(|entry| entry.chunk.fingerprint.clone())
            .collect()
    }

    pub fn search(&self, query_vector: &[f32], top_k: usize, score_threshold: f32) -> Vec<SearchHit> {
        if query_vector.len() != self.dimensions {
            return Vec::new();
        }

        let mut query = query_vector.to_vec();
        l2_normalize(&mut query);

        let mut hits = self
            .entries
            .iter()
            .map(|entry| SearchHit {
                score: dot(&entry.vector, &query),
                chunk: entry.chunk.clone(),
            })
            .filter(|hit| hit.score >= score_threshold)
            .collect::<Vec<_>>();

        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(top_k);
        hits
    }
}

pub fn l2_normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}
