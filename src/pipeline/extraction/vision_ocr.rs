//! Vision OCR engine: transcribes a rendered statement page via an Ollama
//! vision model.
//!
//! Bridges the `VisionClient` (structuring layer) to the
//! `OpticalTextRecognizer` trait (extraction layer).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine as _;

use super::types::{OpticalTextRecognizer, PageImage, RecognizedText};
use super::ExtractionError;
use crate::pipeline::structuring::VisionClient;

const SYSTEM_PROMPT: &str = "\
You are a document transcription engine. Transcribe ALL visible text from \
the provided bank statement image exactly as printed. Do not summarize, \
translate, correct or reorder anything.";

const USER_PROMPT: &str = "\
Transcribe this statement page line by line in reading order. Keep each \
table row on its own line with its date, description and amounts in the \
order they appear. Output plain text only.";

/// Production recognizer backed by an Ollama vision model.
pub struct OllamaVisionOcr {
    vision_client: Arc<dyn VisionClient>,
    model_name: String,
}

impl OllamaVisionOcr {
    pub fn new(vision_client: Arc<dyn VisionClient>, model_name: String) -> Self {
        Self {
            vision_client,
            model_name,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl OpticalTextRecognizer for OllamaVisionOcr {
    async fn recognize(&self, image: &PageImage) -> Result<RecognizedText, ExtractionError> {
        let start = Instant::now();
        let images = vec![base64::engine::general_purpose::STANDARD.encode(&image.png)];

        let raw = self
            .vision_client
            .chat_with_images(&self.model_name, USER_PROMPT, &images, Some(SYSTEM_PROMPT))
            .await
            .map_err(|e| ExtractionError::OcrProcessing(format!("Vision OCR failed: {e}")))?;

        let extracted_text = raw.trim().to_string();
        if extracted_text.is_empty() {
            return Err(ExtractionError::EmptyRecognition(image.page_index));
        }

        tracing::info!(
            model = %self.model_name,
            page = image.page_index,
            elapsed_ms = %start.elapsed().as_millis(),
            text_length = extracted_text.chars().count(),
            "Vision OCR complete"
        );

        Ok(RecognizedText { extracted_text })
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Recognizer returning fixed text, or failing like an unreachable service.
pub struct MockRecognizer {
    text: Option<String>,
}

impl MockRecognizer {
    pub fn new(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { text: None }
    }
}

#[async_trait]
impl OpticalTextRecognizer for MockRecognizer {
    async fn recognize(&self, image: &PageImage) -> Result<RecognizedText, ExtractionError> {
        match &self.text {
            Some(text) if text.trim().is_empty() => {
                Err(ExtractionError::EmptyRecognition(image.page_index))
            }
            Some(text) => Ok(RecognizedText {
                extracted_text: text.clone(),
            }),
            None => Err(ExtractionError::OcrProcessing(
                "mock: recognition service unavailable".into(),
            )),
        }
    }
}
