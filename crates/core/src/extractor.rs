use crate::config::OcrEndpointConfig;
use crate::error::IngestError;
use crate::models::SourceDocument;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use lopdf::Document;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::fmt::Display;
use std::path::Path;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

impl PageText {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

/// Pages kept from one document after the short-page filter.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub page_count: u32,
    pub pages: Vec<PageText>,
}

pub trait PdfExtractor {
    /// Returns every page of the document in page order, including blank ones.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

impl<X: PdfExtractor + ?Sized> PdfExtractor for Box<X> {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        (**self).extract_pages(path)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let extracted = document
            .get_pages()
            .into_keys()
            .map(|page_no| (page_no, document.extract_text(&[page_no])));
        collect_page_text(path, extracted)
    }
}

/// A page whose text cannot be decoded is kept as a blank page, so the rest of the document
/// survives. A document without any readable text is a parse error.
fn collect_page_text<I, E>(path: &Path, extracted: I) -> Result<Vec<PageText>, IngestError>
where
    I: IntoIterator<Item = (u32, Result<String, E>)>,
    E: Display,
{
    let mut pages = Vec::new();
    for (page_no, text) in extracted {
        let text = match text {
            Ok(text) => text,
            Err(error) => {
                warn!(path = %path.display(), page = page_no, %error, "skipping unreadable page");
                String::new()
            }
        };
        pages.push(PageText::new(page_no, text));
    }

    if pages.iter().all(|page| page.text.trim().is_empty()) {
        return Err(IngestError::PdfParse(format!(
            "pdf had no readable page text: {}",
            path.display()
        )));
    }

    Ok(pages)
}

impl SourceDocument {
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
        let metadata = fs::metadata(path)?;
        let modified: DateTime<Utc> = metadata.modified()?.into();

        Ok(Self {
            path: path.to_path_buf(),
            file_name: file_name.to_string(),
            byte_size: metadata.len(),
            modified,
            page_count: 0,
        })
    }

    pub fn with_page_count(self, page_count: u32) -> Self {
        Self { page_count, ..self }
    }
}

/// Extracts the informative pages of `document`.
///
/// A document that cannot be read at all is logged and yields no pages, so one bad file
/// never aborts a directory run. Pages whose trimmed text is shorter than
/// `min_page_chars` are dropped.
pub fn extract_document<X: PdfExtractor + ?Sized>(
    extractor: &X,
    document: &SourceDocument,
    min_page_chars: usize,
) -> ExtractedDocument {
    let pages = match extractor.extract_pages(&document.path) {
        Ok(pages) => pages,
        Err(error) => {
            error!(file = %document.file_name, %error, "error processing pdf");
            return ExtractedDocument::default();
        }
    };

    let page_count = pages.len() as u32;
    info!(file = %document.file_name, pages = page_count, "processing pdf");

    let pages = pages
        .into_iter()
        .filter(|page| {
            let keep = page.text.trim().chars().count() >= min_page_chars;
            if !keep {
                debug!(file = %document.file_name, page = page.number, "skipping short page");
            }
            keep
        })
        .collect();

    ExtractedDocument { page_count, pages }
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// Falls back to a multimodal OCR endpoint when the inner extractor cannot parse a PDF.
pub struct OcrFallbackExtractor<X> {
    inner: X,
    config: OcrEndpointConfig,
    client: Client,
}

impl<X: PdfExtractor> OcrFallbackExtractor<X> {
    pub fn new(inner: X, config: OcrEndpointConfig) -> Self {
        Self {
            inner,
            config,
            client: Client::new(),
        }
    }

    fn extract_with_llm_ocr(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let pdf = fs::read(path)?;
        let payload = LlmOcrRequest {
            pdf_base64: STANDARD.encode(pdf),
            source_path: path.to_string_lossy().to_string(),
        };

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;

        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "multimodal OCR request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json()?;
        payload_to_pages(&payload, path)
    }
}

impl<X: PdfExtractor> PdfExtractor for OcrFallbackExtractor<X> {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        match self.inner.extract_pages(path) {
            Ok(pages) => Ok(pages),
            Err(IngestError::PdfParse(parse_error)) => {
                info!(path = %path.display(), "falling back to multimodal OCR");
                self.extract_with_llm_ocr(path).map_err(|ocr_error| {
                    IngestError::PdfParse(format!(
                        "{parse_error}; multimodal OCR fallback failed: {ocr_error}"
                    ))
                })
            }
            Err(error) => Err(error),
        }
    }
}

fn payload_to_pages(payload: &LlmOcrResponse, path: &Path) -> Result<Vec<PageText>, IngestError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_deref().map(str::trim)?;
                if text.is_empty() {
                    None
                } else {
                    Some(PageText::new(page.page.unwrap_or(1), text))
                }
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let normalized = chunk.trim();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageText::new((index + 1) as u32, normalized))
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(IngestError::OcrFailed(format!(
        "multimodal OCR response was empty for {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct FixedPages(Vec<PageText>);

    impl PdfExtractor for FixedPages {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl PdfExtractor for Broken {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            Err(IngestError::PdfParse("corrupt xref".to_string()))
        }
    }

    fn document() -> SourceDocument {
        SourceDocument {
            path: PathBuf::from("/tmp/manual.pdf"),
            file_name: "manual.pdf".to_string(),
            byte_size: 10,
            modified: Utc::now(),
            page_count: 0,
        }
    }

    #[test]
    fn short_pages_are_skipped() {
        let extractor = FixedPages(vec![
            PageText::new(1, "   tiny   "),
            PageText::new(2, "A page with enough words to keep."),
            PageText::new(3, ""),
        ]);

        let extracted = extract_document(&extractor, &document(), 10);

        assert_eq!(extracted.page_count, 3);
        assert_eq!(extracted.pages.len(), 1);
        assert_eq!(extracted.pages[0].number, 2);
    }

    #[test]
    fn failed_document_yields_no_pages() {
        let extracted = extract_document(&Broken, &document(), 10);
        assert_eq!(extracted.page_count, 0);
        assert!(extracted.pages.is_empty());
    }

    #[test]
    fn undecodable_page_does_not_lose_the_document() -> Result<(), IngestError> {
        let extracted = vec![
            (1, Ok("Coverage starts on the policy date.".to_string())),
            (2, Err("unsupported font encoding")),
            (3, Ok("Exclusions are listed below.".to_string())),
        ];

        let pages = collect_page_text(Path::new("policy.pdf"), extracted)?;

        assert_eq!(pages.len(), 3);
        assert!(pages[1].text.is_empty());
        assert_eq!(pages[2].text, "Exclusions are listed below.");
        Ok(())
    }

    #[test]
    fn document_without_readable_pages_is_a_parse_error() {
        let extracted: Vec<(u32, Result<String, &str>)> =
            vec![(1, Err("unsupported font encoding")), (2, Ok("  ".to_string()))];

        let result = collect_page_text(Path::new("scan.pdf"), extracted);
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }

    #[test]
    fn lopdf_rejects_corrupt_pdf() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = LopdfExtractor.extract_pages(&path);
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }

    #[test]
    fn source_document_reads_file_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("a.pdf");
        fs::write(&path, b"abcdef")?;

        let source = SourceDocument::from_path(&path)?;
        assert_eq!(source.file_name, "a.pdf");
        assert_eq!(source.byte_size, 6);
        assert_eq!(source.page_count, 0);
        assert_eq!(source.with_page_count(4).page_count, 4);
        Ok(())
    }

    #[test]
    fn ocr_payload_with_pages_converts_only_nonempty_text() {
        let response = LlmOcrResponse {
            pages: Some(vec![
                LlmOcrPage {
                    page: Some(2),
                    text: Some("  ".to_string()),
                },
                LlmOcrPage {
                    page: Some(3),
                    text: Some("Page 3".to_string()),
                },
            ]),
            text: None,
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf"))
            .expect("multimodal response should be parsed");

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, 3);
        assert_eq!(pages[0].text, "Page 3");
    }

    #[test]
    fn ocr_payload_fallback_text_split_by_form_feed() {
        let response = LlmOcrResponse {
            pages: None,
            text: Some("First\u{000C}Second\n".to_string()),
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf"))
            .expect("multimodal response should be parsed");

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].number, 2);
        assert_eq!(pages[1].text, "Second");
    }

    #[test]
    fn ocr_is_not_attempted_for_io_errors() {
        struct Missing;
        impl PdfExtractor for Missing {
            fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
                Err(IngestError::Io(std::io::Error::from(
                    std::io::ErrorKind::NotFound,
                )))
            }
        }

        let config = OcrEndpointConfig {
            endpoint: "http://127.0.0.1:9/ocr".to_string(),
            api_key: None,
        };
        let extractor = OcrFallbackExtractor::new(Missing, config);
        let result = extractor.extract_pages(Path::new("missing.pdf"));
        assert!(matches!(result, Err(IngestError::Io(_))));
    }
}
