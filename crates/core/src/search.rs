use crate::embeddings::Embedder;
use crate::error::{IngestError, SearchError};
use crate::index::SimilarityIndex;
use crate::models::{SearchHit, SearchQuery};
use crate::normalizer::preprocess_query;
use crate::store;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Answers similarity queries against one persisted directory index.
pub struct IndexSearcher<E> {
    index: SimilarityIndex,
    embedder: E,
}

impl<E: Embedder> IndexSearcher<E> {
    pub fn new(index: SimilarityIndex, embedder: E) -> Self {
        Self { index, embedder }
    }

    pub fn open(dir: &Path, embedder: E) -> Result<Self, SearchError> {
        let index =
            store::load_index(dir)?.ok_or_else(|| SearchError::IndexMissing(dir.to_path_buf()))?;
        if index.model != embedder.model_name() {
            return Err(IngestError::ModelMismatch {
                index: index.model,
                embedder: embedder.model_name().to_string(),
            }
            .into());
        }
        Ok(Self::new(index, embedder))
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, SearchError> {
        let prepared = preprocess_query(&query.text);
        if prepared.is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if query.top_k == 0 {
            return Err(SearchError::Request("top_k must be positive".to_string()));
        }

        let vectors = self.embedder.embed_batch(&[prepared.as_str()])?;
        let query_vector = vectors
            .first()
            .ok_or_else(|| SearchError::Request("embedder returned no vector".to_string()))?;

        if query_vector.len() != self.index.dimensions {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.index.dimensions
            )));
        }

        let hits = self
            .index
            .search(query_vector, query.top_k, query.score_threshold);
        debug!(query = %prepared, hits = hits.len(), "similarity search");
        Ok(hits)
    }
}

/// Renders a citation block listing each `source (Page n)` once, in hit order.
pub fn format_sources(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut seen = HashSet::new();
    let mut formatted = String::from("\n\nSources:\n");
    for hit in hits {
        let line = format!("- {} (Page {})", hit.chunk.source, hit.chunk.page);
        if seen.insert(line.clone()) {
            formatted.push_str(&line);
            formatted.push('\n');
        }
    }
    formatted
}
