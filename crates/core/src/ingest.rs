use crate::builder::BatchIndexBuilder;
use crate::chunking::{build_page_chunks, ChunkingConfig, RecursiveSplitter};
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::{extract_document, PdfExtractor};
use crate::index::SimilarityIndex;
use crate::models::{IngestionOptions, PdfChunk, ProcessingStats, SourceDocument};
use crate::store;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// A directory that directly contains PDFs, with its path relative to the input root.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfDirectory {
    pub dir: PathBuf,
    pub relative: PathBuf,
    pub pdfs: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DirectoryReport {
    pub relative: PathBuf,
    pub output_dir: PathBuf,
    pub stats: ProcessingStats,
    pub duplicates_dropped: usize,
    /// Entries in the saved index after this run, earlier runs included.
    pub indexed_entries: usize,
    pub sources: Vec<SourceDocument>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub directories: Vec<DirectoryReport>,
}

impl IngestionReport {
    pub fn total_chunks(&self) -> usize {
        self.directories
            .iter()
            .map(|report| report.stats.total_chunks)
            .sum()
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Walks `root` and groups PDFs by the directory that holds them, in walk order.
pub fn discover_pdf_directories(root: &Path) -> Vec<PdfDirectory> {
    let mut directories: Vec<PdfDirectory> = Vec::new();
    let mut positions: HashMap<PathBuf, usize> = HashMap::new();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() || !is_pdf(entry.path()) {
            continue;
        }

        let Some(parent) = entry.path().parent() else {
            continue;
        };

        let position = *positions.entry(parent.to_path_buf()).or_insert_with(|| {
            let relative = parent.strip_prefix(root).unwrap_or(parent).to_path_buf();
            directories.push(PdfDirectory {
                dir: parent.to_path_buf(),
                relative,
                pdfs: Vec::new(),
            });
            directories.len() - 1
        });
        directories[position].pdfs.push(entry.path().to_path_buf());
    }

    directories
}

/// Runs extract, normalize, split, dedup and batched indexing for each PDF directory.
///
/// Everything runs on the calling thread; the running index of a directory has a single
/// writer.
pub struct DirectoryIngestor<X, E> {
    extractor: X,
    builder: BatchIndexBuilder<E>,
    splitter: RecursiveSplitter,
    options: IngestionOptions,
}

impl<X: PdfExtractor, E: Embedder> DirectoryIngestor<X, E> {
    pub fn new(extractor: X, embedder: E, options: IngestionOptions) -> Result<Self, IngestError> {
        options.validate()?;
        let splitter = RecursiveSplitter::new(ChunkingConfig::from(&options))?;
        Ok(Self {
            extractor,
            builder: BatchIndexBuilder::new(embedder, &options),
            splitter,
            options,
        })
    }

    /// Processes every PDF directory under `input_root`, mirroring it under `output_root`.
    ///
    /// Stops at the first directory that fails; directories finished before it keep their
    /// output.
    pub fn ingest_tree(
        &self,
        input_root: &Path,
        output_root: &Path,
    ) -> Result<IngestionReport, IngestError> {
        let directories = discover_pdf_directories(input_root);
        if directories.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                input_root.display()
            )));
        }

        let mut report = IngestionReport::default();
        for directory in &directories {
            report
                .directories
                .push(self.process_directory(directory, output_root)?);
        }
        Ok(report)
    }

    pub fn process_directory(
        &self,
        directory: &PdfDirectory,
        output_root: &Path,
    ) -> Result<DirectoryReport, IngestError> {
        let output_dir = output_root.join(&directory.relative);
        fs::create_dir_all(&output_dir)?;
        info!(
            directory = %directory.relative.display(),
            pdfs = directory.pdfs.len(),
            "processing directory"
        );

        let mut stats = ProcessingStats::begin(directory.pdfs.len());
        let mut running = store::load_index(&output_dir)?;
        if let Some(index) = &running {
            let model = self.builder.embedder().model_name();
            if index.model != model {
                let error = IngestError::ModelMismatch {
                    index: index.model.clone(),
                    embedder: model.to_string(),
                };
                log_failure(directory, &stats, &error);
                return Err(error);
            }
        }
        // Chunks already in the index are not embedded again on a re-run.
        let mut seen: HashSet<String> = running
            .as_ref()
            .map(SimilarityIndex::fingerprints)
            .unwrap_or_default();

        let mut sources = Vec::with_capacity(directory.pdfs.len());
        let mut pending: Vec<PdfChunk> = Vec::new();
        let mut duplicates_dropped = 0usize;

        for path in &directory.pdfs {
            let document = match SourceDocument::from_path(path) {
                Ok(document) => document,
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable file");
                    continue;
                }
            };

            let extracted = extract_document(&self.extractor, &document, self.options.min_page_chars);
            let document = document.with_page_count(extracted.page_count);
            if !extracted.pages.is_empty() {
                let processed_at = Utc::now();
                let mut kept = 0usize;
                for page in &extracted.pages {
                    for chunk in build_page_chunks(&document, page, &self.splitter, processed_at) {
                        if seen.insert(chunk.fingerprint.clone()) {
                            pending.push(chunk);
                            kept += 1;
                        } else {
                            duplicates_dropped += 1;
                        }
                    }
                }

                stats.processed_pdfs += 1;
                stats.total_pages += extracted.pages.len();
                stats.total_chunks += kept;
            }
            sources.push(document);

            if pending.len() >= self.options.checkpoint_chunks {
                if let Err(error) = self.checkpoint(&mut running, &mut pending, &output_dir) {
                    log_failure(directory, &stats, &error);
                    return Err(error);
                }
            }
        }

        if let Err(error) = self.checkpoint(&mut running, &mut pending, &output_dir) {
            log_failure(directory, &stats, &error);
            return Err(error);
        }

        stats.finish();
        store::write_processing_stats(&output_dir, &stats)?;
        store::write_sources_manifest(&output_dir, &sources)?;

        let indexed_entries = running.as_ref().map(SimilarityIndex::len).unwrap_or(0);
        info!(
            directory = %directory.relative.display(),
            processed_pdfs = stats.processed_pdfs,
            total_pages = stats.total_pages,
            total_chunks = stats.total_chunks,
            duplicates_dropped,
            indexed_entries,
            "directory complete"
        );

        Ok(DirectoryReport {
            relative: directory.relative.clone(),
            output_dir,
            stats,
            duplicates_dropped,
            indexed_entries,
            sources,
        })
    }

    /// Indexes the accumulated chunks, merges them into the running index and persists it.
    fn checkpoint(
        &self,
        running: &mut Option<SimilarityIndex>,
        pending: &mut Vec<PdfChunk>,
        output_dir: &Path,
    ) -> Result<(), IngestError> {
        if pending.is_empty() {
            return Ok(());
        }

        info!(chunks = pending.len(), dir = %output_dir.display(), "checkpoint");
        let Some(flushed) = self.builder.build(pending.as_slice())? else {
            return Ok(());
        };

        let merged = store::merge_indexes(running.take(), flushed)?;
        store::save_index(&merged, output_dir)?;
        *running = Some(merged);
        pending.clear();
        Ok(())
    }
}

fn log_failure(directory: &PdfDirectory, stats: &ProcessingStats, error: &IngestError) {
    error!(
        directory = %directory.relative.display(),
        processed_pdfs = stats.processed_pdfs,
        total_pages = stats.total_pages,
        total_chunks = stats.total_chunks,
        %error,
        "directory run failed"
    );
}
