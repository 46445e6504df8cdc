use crate::error::IngestError;
use crate::index::SimilarityIndex;
use crate::models::{ProcessingStats, SourceDocument};
use chrono::Local;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{error, info};

pub const INDEX_FILE: &str = "index.json";
pub const SOURCES_FILE: &str = "sources.txt";
pub const STATS_FILE: &str = "processing_stats.json";

/// Loads the index stored in `dir`. A directory without an index is `Ok(None)`.
pub fn load_index(dir: &Path) -> Result<Option<SimilarityIndex>, IngestError> {
    let path = dir.join(INDEX_FILE);
    if !path.is_file() {
        return Ok(None);
    }

    let reader = BufReader::new(File::open(&path)?);
    let index: SimilarityIndex = serde_json::from_reader(reader)?;
    info!(path = %path.display(), entries = index.len(), "loaded existing index");
    Ok(Some(index))
}

/// Replaces the index in `dir` as a whole: the new file is written next to the old one and
/// renamed over it, so readers see either the previous or the new index.
pub fn save_index(index: &SimilarityIndex, dir: &Path) -> Result<(), IngestError> {
    let result = (|| {
        fs::create_dir_all(dir)?;
        let mut file = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(&mut file);
            serde_json::to_writer(&mut writer, index)?;
            writer.flush()?;
        }
        file.as_file().sync_all()?;
        file.persist(dir.join(INDEX_FILE))?;
        Ok::<_, IngestError>(())
    })();

    match &result {
        Ok(()) => info!(dir = %dir.display(), entries = index.len(), "saved index"),
        Err(error) => error!(dir = %dir.display(), %error, "error saving index"),
    }
    result
}

pub fn merge_indexes(
    existing: Option<SimilarityIndex>,
    new: SimilarityIndex,
) -> Result<SimilarityIndex, IngestError> {
    match existing {
        None => Ok(new),
        Some(mut existing) => {
            existing.merge_from(new)?;
            Ok(existing)
        }
    }
}

/// Writes `sources.txt`: one `name\tbytes\tmodified` line per PDF, sorted by name.
pub fn write_sources_manifest(dir: &Path, documents: &[SourceDocument]) -> Result<(), IngestError> {
    let mut sorted = documents.iter().collect::<Vec<_>>();
    sorted.sort_by(|left, right| left.file_name.cmp(&right.file_name));

    let mut writer = BufWriter::new(File::create(dir.join(SOURCES_FILE))?);
    for document in &sorted {
        writeln!(
            writer,
            "{}\t{}\t{}",
            document.file_name,
            document.byte_size,
            document
                .modified
                .with_timezone(&Local)
                .format("%a %b %e %H:%M:%S %Y")
        )?;
    }
    writer.flush()?;

    info!(dir = %dir.display(), documents = sorted.len(), "saved source list");
    Ok(())
}

pub fn write_processing_stats(dir: &Path, stats: &ProcessingStats) -> Result<(), IngestError> {
    let path = dir.join(STATS_FILE);
    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut writer, stats)?;
    writer.flush()?;

    info!(path = %path.display(), "saved processing statistics");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PdfChunk;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn index(ids: &[&str]) -> SimilarityIndex {
        let chunks = ids
            .iter()
            .map(|id| PdfChunk {
                chunk_id: id.to_string(),
                fingerprint: format!("fp-{id}"),
                source: "a.pdf".to_string(),
                source_path: "/in/a.pdf".to_string(),
                page: 1,
                chunk_index: 0,
                text: format!("text {id}"),
                processed_at: Utc::now(),
            })
            .collect::<Vec<_>>();
        let vectors = ids.iter().map(|_| vec![1.0, 2.0]).collect();
        SimilarityIndex::from_embeddings("m", &chunks, vectors).expect("valid test index")
    }

    #[test]
    fn missing_index_loads_as_none() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert!(load_index(dir.path())?.is_none());
        Ok(())
    }

    #[test]
    fn saved_index_round_trips_and_is_overwritten() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let out = dir.path().join("nested");

        save_index(&index(&["a"]), &out)?;
        let merged = merge_indexes(load_index(&out)?, index(&["b", "c"]))?;
        save_index(&merged, &out)?;

        let loaded = load_index(&out)?.expect("index was saved");
        assert_eq!(loaded, merged);
        assert_eq!(loaded.len(), 3);

        let leftovers = fs::read_dir(&out)?.count();
        assert_eq!(leftovers, 1);
        Ok(())
    }

    #[test]
    fn merge_without_existing_returns_new() -> Result<(), IngestError> {
        let merged = merge_indexes(None, index(&["x"]))?;
        assert_eq!(merged.len(), 1);
        Ok(())
    }

    #[test]
    fn sources_manifest_is_sorted_tsv() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let modified = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).single().expect("valid date");
        let documents = vec![
            SourceDocument {
                path: PathBuf::from("/in/zeta.pdf"),
                file_name: "zeta.pdf".to_string(),
                byte_size: 20,
                modified,
                page_count: 1,
            },
            SourceDocument {
                path: PathBuf::from("/in/alpha.pdf"),
                file_name: "alpha.pdf".to_string(),
                byte_size: 10,
                modified,
                page_count: 1,
            },
        ];

        write_sources_manifest(dir.path(), &documents)?;
        let content = fs::read_to_string(dir.path().join(SOURCES_FILE))?;
        let lines: Vec<_> = content.lines().collect();

        assert_eq!(lines.len(), 2);
        let fields: Vec<_> = lines[0].split('\t').collect();
        assert_eq!(fields[0], "alpha.pdf");
        assert_eq!(fields[1], "10");
        assert!(fields[2].ends_with("2024"));
        assert!(lines[1].starts_with("zeta.pdf\t20\t"));
        Ok(())
    }

    #[test]
    fn stats_file_has_expected_keys() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut stats = ProcessingStats::begin(2);
        stats.total_chunks = 7;
        stats.finish();

        write_processing_stats(dir.path(), &stats)?;
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(STATS_FILE))?)?;

        for key in [
            "total_pdfs",
            "processed_pdfs",
            "total_pages",
            "total_chunks",
            "start_time",
            "end_time",
            "processing_time",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["total_chunks"], 7);
        Ok(())
    }
}
