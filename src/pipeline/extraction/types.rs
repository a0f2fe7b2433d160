use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// How the statement text is obtained. Decided once per conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// The embedded text layer is used directly.
    TextNative,
    /// The page is rasterized and sent to OCR.
    ImageBased,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextNative => "text_native",
            Self::ImageBased => "image_based",
        }
    }
}

/// One rendered PDF page, PNG-encoded. Never persisted.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub page_index: usize,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// Text recovered from a page image by the OCR collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedText {
    pub extracted_text: String,
}

/// Embedded text layer extraction. CPU-bound; callers run it off the async executor.
pub trait TextLayerExtractor: Send + Sync {
    /// Text of every page, joined with `\n` in page order.
    /// An image-only PDF yields an empty string, not an error.
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String, ExtractionError>;
}

/// Renders a single PDF page to an image for OCR.
pub trait PageRasterizer: Send + Sync {
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        scale: f32,
    ) -> Result<PageImage, ExtractionError>;
}

/// Optical recognition collaborator (allows mocking for tests).
#[async_trait]
pub trait OpticalTextRecognizer: Send + Sync {
    async fn recognize(&self, image: &PageImage) -> Result<RecognizedText, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_text_uses_camel_case_key() {
        let text = RecognizedText {
            extracted_text: "3 Feb Card payment".into(),
        };
        let json = serde_json::to_string(&text).unwrap();
        assert_eq!(json, r#"{"extractedText":"3 Feb Card payment"}"#);
    }

    #[test]
    fn mode_serializes_snake_case() {
        let json = serde_json::to_string(&ExtractionMode::ImageBased).unwrap();
        assert_eq!(json, "\"image_based\"");
        assert_eq!(ExtractionMode::TextNative.as_str(), "text_native");
    }
}
