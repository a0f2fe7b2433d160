use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{Datelike, Utc};

use super::parser::parse_response_payload;
use super::prompt::{build_extraction_prompt, response_schema, EXTRACTION_SYSTEM_PROMPT, RULE_CONTRACT_VERSION};
use super::sanitize::sanitize_for_llm;
use super::types::{ExtractionRequest, LlmClient, TransactionExtractor};
use super::StructuringError;
use crate::pipeline_config::DEFAULT_MAX_INPUT_CHARS;

/// Schema-constrained transaction extraction through an Ollama text model.
pub struct OllamaTransactionExtractor {
    llm: Arc<dyn LlmClient>,
    model: String,
    max_input_chars: usize,
    fallback_year: i32,
    schema: serde_json::Value,
}

impl OllamaTransactionExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, model: &str) -> Self {
        Self {
            llm,
            model: model.to_string(),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            fallback_year: Utc::now().year(),
            schema: response_schema(),
        }
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    pub fn with_fallback_year(mut self, year: i32) -> Self {
        self.fallback_year = year;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TransactionExtractor for OllamaTransactionExtractor {
    async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<Option<serde_json::Value>, StructuringError> {
        let start = Instant::now();
        let text = sanitize_for_llm(&request.raw_text, self.max_input_chars);
        let prompt = build_extraction_prompt(&text, request.source, self.fallback_year);

        let response = self
            .llm
            .generate(&self.model, &prompt, EXTRACTION_SYSTEM_PROMPT, Some(&self.schema))
            .await?;

        tracing::info!(
            model = %self.model,
            rules = RULE_CONTRACT_VERSION,
            source = request.source.as_str(),
            input_chars = text.chars().count(),
            response_chars = response.chars().count(),
            elapsed_ms = %start.elapsed().as_millis(),
            "LLM extraction complete"
        );

        parse_response_payload(&response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::ExtractionMode;
    use crate::pipeline::structuring::MockLlmClient;

    fn request(text: &str, source: ExtractionMode) -> ExtractionRequest {
        ExtractionRequest {
            raw_text: text.into(),
            source,
        }
    }

    #[tokio::test]
    async fn returns_parsed_payload() {
        let llm = Arc::new(MockLlmClient::new(
            r#"{"transactions":[{"date":"2024-02-03","description":"Card payment","debit":24.5,"balance":39975.5}]}"#,
        ));
        let extractor = OllamaTransactionExtractor::new(llm, "qwen2.5:7b");
        let payload = extractor
            .extract(&request("3 Feb Card payment 24.50 39,975.50", ExtractionMode::TextNative))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload["transactions"][0]["description"], "Card payment");
    }

    #[tokio::test]
    async fn blank_response_is_none() {
        let extractor = OllamaTransactionExtractor::new(Arc::new(MockLlmClient::new("")), "m");
        let payload = extractor.extract(&request("x", ExtractionMode::TextNative)).await.unwrap();
        assert!(payload.is_none());
    }

    #[tokio::test]
    async fn prose_response_is_json_error() {
        let extractor =
            OllamaTransactionExtractor::new(Arc::new(MockLlmClient::new("Sorry, I can't.")), "m");
        let err = extractor.extract(&request("x", ExtractionMode::TextNative)).await.unwrap_err();
        assert!(matches!(err, StructuringError::JsonParsing(_)));
    }

    #[tokio::test]
    async fn transport_error_propagates() {
        let extractor = OllamaTransactionExtractor::new(Arc::new(MockLlmClient::unreachable()), "m");
        let err = extractor.extract(&request("x", ExtractionMode::TextNative)).await.unwrap_err();
        assert!(matches!(err, StructuringError::OllamaConnection(_)));
    }

    #[tokio::test]
    async fn sends_schema_and_sanitized_prompt() {
        let llm = Arc::new(MockLlmClient::new(r#"{"transactions":[]}"#));
        let extractor = OllamaTransactionExtractor::new(llm.clone(), "m")
            .with_fallback_year(2023)
            .with_max_input_chars(1000);
        extractor
            .extract(&request("3 Feb\u{200B} Coffee 3.20", ExtractionMode::ImageBased))
            .await
            .unwrap();

        let prompt = llm.last_prompt().unwrap();
        assert!(prompt.contains("3 Feb Coffee 3.20"));
        assert!(prompt.contains("misreads"));
        assert!(prompt.contains("2023"));
        assert_eq!(llm.last_format(), Some(response_schema()));
    }
}
