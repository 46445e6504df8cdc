use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("multimodal OCR failed: {0}")]
    OcrFailed(String),

    #[error("embedding request failed: {0}")]
    Embedding(String),

    #[error("embedding dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("index was built with model {index}, embedder is {embedder}")]
    ModelMismatch { index: String, embedder: String },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to persist index file: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("batch {batch} failed after {attempts} attempts: {source}")]
    BatchFailed {
        batch: usize,
        attempts: usize,
        #[source]
        source: Box<IngestError>,
    },
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(String),

    #[error("no index found at {}", .0.display())]
    IndexMissing(PathBuf),

    #[error("index error: {0}")]
    Index(#[from] IngestError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
