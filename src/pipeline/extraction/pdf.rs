use std::panic;

use super::types::TextLayerExtractor;
use super::ExtractionError;

/// PDF text layer extractor using the pdf-extract crate.
/// Handles digital statements with embedded text; scans come back (nearly) empty.
pub struct PdfTextLayer;

impl TextLayerExtractor for PdfTextLayer {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String, ExtractionError> {
        // pdf-extract panics on some malformed content streams instead of erroring.
        let page_texts =
            panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(pdf_bytes))
                .map_err(|_| {
                    ExtractionError::PdfParsing("PDF parser aborted on malformed content".into())
                })?
                .map_err(|e| map_parse_error(&e.to_string()))?;

        let page_count = page_texts.len();
        let text = join_pages(&page_texts);

        tracing::debug!(
            pages = page_count,
            text_length = text.chars().count(),
            "Extracted PDF text layer"
        );

        Ok(text)
    }
}

/// Detect encrypted PDFs for user-friendly messaging.
fn map_parse_error(msg: &str) -> ExtractionError {
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfParsing(msg.to_string())
    }
}

/// Trim each page and join in page order with a single newline.
fn join_pages(pages: &[String]) -> String {
    pages
        .iter()
        .map(|p| p.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Mock for testing ──────────────────────────────────────

/// Returns a fixed text layer, or a parse failure when built with `failing()`.
pub struct MockTextLayer {
    text: Option<String>,
}

impl MockTextLayer {
    pub fn new(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { text: None }
    }
}

impl TextLayerExtractor for MockTextLayer {
    fn extract_text(&self, _pdf_bytes: &[u8]) -> Result<String, ExtractionError> {
        self.text
            .clone()
            .ok_or_else(|| ExtractionError::PdfParsing("mock: not a PDF".into()))
    }
}
