pub mod builder;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod normalizer;
pub mod search;
pub mod store;

pub use builder::{BatchIndexBuilder, BatchState};
pub use chunking::{build_page_chunks, ChunkingConfig, RecursiveSplitter, DEFAULT_SEPARATORS};
pub use config::{EmbeddingEndpointConfig, OcrEndpointConfig};
pub use embeddings::{
    AzureOpenAiEmbedder, CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, SearchError};
pub use extractor::{
    extract_document, ExtractedDocument, LopdfExtractor, OcrFallbackExtractor, PageText,
    PdfExtractor,
};
pub use index::{IndexEntry, SimilarityIndex};
pub use ingest::{
    discover_pdf_directories, DirectoryIngestor, DirectoryReport, IngestionReport, PdfDirectory,
};
pub use models::{
    IngestionOptions, PdfChunk, ProcessingStats, SearchHit, SearchQuery, SourceDocument,
};
pub use normalizer::{fingerprint, normalize_text, preprocess_query, NormalizedText};
pub use search::{format_sources, IndexSearcher};
pub use store::{
    load_index, merge_indexes, save_index, write_processing_stats, write_sources_manifest,
};
