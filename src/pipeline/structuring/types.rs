use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::StructuringError;
use crate::pipeline::extraction::ExtractionMode;

/// One statement row.
///
/// `balance` must be present in every payload (number or null); `debit` and
/// `credit` are omitted when not applicable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// `YYYY-MM-DD`.
    #[serde(default, deserialize_with = "text::or_empty")]
    pub date: String,
    #[serde(default, deserialize_with = "text::or_empty")]
    pub description: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "money::serialize"
    )]
    pub debit: Option<Decimal>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "money::serialize"
    )]
    pub credit: Option<Decimal>,
    /// No `default`: a payload without the key fails to deserialize.
    #[serde(serialize_with = "money::serialize", deserialize_with = "money::required")]
    pub balance: Option<Decimal>,
}

/// Input handed to a transaction extractor.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub raw_text: String,
    /// Which path produced `raw_text`.
    pub source: ExtractionMode,
}

/// Schema-constrained structured extraction (the extractor port).
///
/// `Ok(None)` is a null/undefined result and is fatal to the conversion.
/// `Ok(Some(payload))` is expected to be `{ "transactions": [...] }`;
/// shape problems inside the payload are handled by the caller.
#[async_trait]
pub trait TransactionExtractor: Send + Sync {
    async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<Option<serde_json::Value>, StructuringError>;

    /// Short engine name for logs.
    fn name(&self) -> &str;
}

/// Ollama LLM client abstraction (allows mocking).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single non-streaming generation. `format` is a JSON schema the
    /// output must conform to.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        format: Option<&serde_json::Value>,
    ) -> Result<String, StructuringError>;

    async fn list_models(&self) -> Result<Vec<String>, StructuringError>;
}

/// Vision-capable chat client (image in, text out).
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// `images` are base64-encoded PNG/JPEG payloads.
    async fn chat_with_images(
        &self,
        model: &str,
        prompt: &str,
        images: &[String],
        system: Option<&str>,
    ) -> Result<String, StructuringError>;
}

// ── Mock for testing ──────────────────────────────────────

/// Extractor returning a fixed payload (or error), optionally after a delay.
pub struct MockTransactionExtractor {
    payload: Result<Option<serde_json::Value>, String>,
    delay: Option<std::time::Duration>,
}

impl MockTransactionExtractor {
    pub fn returning(payload: Option<serde_json::Value>) -> Self {
        Self {
            payload: Ok(payload),
            delay: None,
        }
    }

    pub fn failing(body: &str) -> Self {
        Self {
            payload: Err(body.to_string()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl TransactionExtractor for MockTransactionExtractor {
    async fn extract(
        &self,
        _request: &ExtractionRequest,
    ) -> Result<Option<serde_json::Value>, StructuringError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.payload
            .clone()
            .map_err(|body| StructuringError::OllamaError { status: 500, body })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

mod text {
    use serde::{Deserialize, Deserializer};

    /// Accept a string or null; null becomes empty and is dropped later by the sanitizer.
    pub fn or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
    }
}

mod money {
    use std::str::FromStr;

    use rust_decimal::Decimal;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Emit JSON numbers with the decimal's exact digits, not rust_decimal's
    /// default strings.
    pub fn serialize<S>(value: &Option<Decimal>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serde_json::Number::from_str(&v.to_string())
                .map_err(S::Error::custom)?
                .serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    /// Nullable but required: used with no `#[serde(default)]`.
    pub fn required<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<Decimal>::deserialize(deserializer)
    }
}
