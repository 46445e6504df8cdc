use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use pdf_index_core::{
    format_sources, AzureOpenAiEmbedder, CharacterNgramEmbedder, DirectoryIngestor, Embedder,
    EmbeddingEndpointConfig, IndexSearcher, IngestionOptions, LopdfExtractor, OcrEndpointConfig,
    OcrFallbackExtractor, PdfExtractor, SearchQuery,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-index", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    embedding: EmbeddingArgs,
}

#[derive(Args)]
struct EmbeddingArgs {
    /// Which embedder produces the vectors.
    #[arg(long, value_enum, default_value_t = EmbedderKind::Azure, global = true)]
    embedder: EmbedderKind,

    /// Azure OpenAI resource endpoint
    #[arg(long, env = "AZURE_EMBEDDING_ENDPOINT", global = true)]
    embedding_endpoint: Option<String>,

    /// Azure OpenAI API key
    #[arg(long, env = "AZURE_OPENAI_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Embedding deployment name
    #[arg(long, env = "AZURE_EMBEDDING_DEPLOYMENT", default_value = "vectorai3", global = true)]
    deployment: String,

    /// Azure OpenAI API version
    #[arg(long, default_value = pdf_index_core::config::DEFAULT_API_VERSION, global = true)]
    api_version: String,

    /// Maximum number of texts per embedding HTTP request.
    #[arg(long, default_value_t = pdf_index_core::config::DEFAULT_REQUEST_CHUNK_SIZE, global = true)]
    request_chunk_size: usize,

    /// HTTP timeout for embedding requests, in seconds.
    #[arg(long, default_value = "60", global = true)]
    timeout_secs: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    /// Azure OpenAI embeddings deployment.
    Azure,
    /// Local character-trigram hashing, no network access.
    Ngram,
}

#[derive(Subcommand)]
enum Command {
    /// Build or extend one vector index per PDF directory.
    Ingest {
        /// Root folder whose subdirectories hold PDFs.
        #[arg(long)]
        input_dir: PathBuf,
        /// Root folder that mirrors the input tree with one index per directory.
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long, default_value = "50")]
        batch_size: usize,
        #[arg(long, default_value = "3")]
        max_retries: usize,
        /// Fixed delay between attempts of a failed batch.
        #[arg(long, default_value = "5")]
        retry_delay_secs: u64,
        /// Accumulated chunk count that triggers a flush to disk.
        #[arg(long, default_value = "250")]
        checkpoint_chunks: usize,
        #[arg(long, default_value = "3000")]
        chunk_size: usize,
        #[arg(long, default_value = "200")]
        chunk_overlap: usize,
        /// Pages with less trimmed text than this are skipped.
        #[arg(long, default_value = "10")]
        min_page_chars: usize,
        /// Multimodal OCR endpoint used when a PDF has no text layer.
        #[arg(long, env = "LLM_OCR_ENDPOINT")]
        ocr_endpoint: Option<String>,
        #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
        ocr_api_key: Option<String>,
    },
    /// Query a directory index and print matching chunks with their sources.
    Search {
        /// Output directory holding index.json.
        #[arg(long)]
        index_dir: PathBuf,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "3")]
        top_k: usize,
        /// Minimum cosine similarity for a hit.
        #[arg(long, default_value = "0.5")]
        score_threshold: f32,
    },
}

fn build_embedder(args: &EmbeddingArgs) -> anyhow::Result<Box<dyn Embedder>> {
    match args.embedder {
        EmbedderKind::Ngram => Ok(Box::new(CharacterNgramEmbedder::default())),
        EmbedderKind::Azure => {
            let endpoint = args
                .embedding_endpoint
                .as_deref()
                .context("--embedding-endpoint or AZURE_EMBEDDING_ENDPOINT is required")?;
            let api_key = args
                .api_key
                .clone()
                .context("--api-key or AZURE_OPENAI_KEY is required")?;

            let mut config = EmbeddingEndpointConfig::new(endpoint, api_key, &args.deployment)?;
            config.api_version = args.api_version.clone();
            config.request_chunk_size = args.request_chunk_size;
            config.timeout = Duration::from_secs(args.timeout_secs);

            Ok(Box::new(AzureOpenAiEmbedder::new(&config)?))
        }
    }
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-index boot"
    );

    let embedder = build_embedder(&cli.embedding)?;

    match cli.command {
        Command::Ingest {
            input_dir,
            output_dir,
            batch_size,
            max_retries,
            retry_delay_secs,
            checkpoint_chunks,
            chunk_size,
            chunk_overlap,
            min_page_chars,
            ocr_endpoint,
            ocr_api_key,
        } => {
            let options = IngestionOptions {
                chunk_max_chars: chunk_size,
                chunk_overlap_chars: chunk_overlap,
                min_page_chars,
                batch_size,
                max_retries,
                retry_delay: Duration::from_secs(retry_delay_secs),
                checkpoint_chunks,
            };

            let extractor: Box<dyn PdfExtractor> =
                match OcrEndpointConfig::from_parts(ocr_endpoint, ocr_api_key) {
                    Some(config) => Box::new(OcrFallbackExtractor::new(LopdfExtractor, config)),
                    None => Box::new(LopdfExtractor),
                };

            info!(
                input = %input_dir.display(),
                output = %output_dir.display(),
                model = embedder.model_name(),
                "starting document processing"
            );

            let ingestor = DirectoryIngestor::new(extractor, embedder, options)?;
            let report = ingestor
                .ingest_tree(&input_dir, &output_dir)
                .with_context(|| format!("ingesting {}", input_dir.display()))?;

            for directory in &report.directories {
                if directory.stats.processed_pdfs < directory.stats.total_pdfs {
                    warn!(
                        directory = %directory.relative.display(),
                        skipped = directory.stats.total_pdfs - directory.stats.processed_pdfs,
                        "some pdfs produced no text"
                    );
                }
                println!(
                    "{}: {} of {} pdfs, {} pages, {} new chunks, {} duplicates dropped, {} indexed",
                    directory.output_dir.display(),
                    directory.stats.processed_pdfs,
                    directory.stats.total_pdfs,
                    directory.stats.total_pages,
                    directory.stats.total_chunks,
                    directory.duplicates_dropped,
                    directory.indexed_entries
                );
            }

            println!(
                "{} chunks ingested at {}",
                report.total_chunks(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Search {
            index_dir,
            query,
            top_k,
            score_threshold,
        } => {
            let searcher = IndexSearcher::open(&index_dir, embedder)?;
            info!(
                index = %index_dir.display(),
                model = %searcher.index().model,
                entries = searcher.index().len(),
                "index loaded"
            );
            let search_query = SearchQuery {
                text: query,
                top_k,
                score_threshold,
            };

            let hits = searcher.search(&search_query)?;
            println!("query: {}", search_query.text);
            if hits.is_empty() {
                println!("no chunks scored above {score_threshold:.2}");
            }

            for hit in &hits {
                println!(
                    "score={:.4} chunk={} source={} page={}",
                    hit.score, hit.chunk.chunk_id, hit.chunk.source, hit.chunk.page
                );
                println!("  chunk_text:\n{}", hit.chunk.text);
            }

            print!("{}", format_sources(&hits));
        }
    }

    Ok(())
}
