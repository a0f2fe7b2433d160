use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::{LlmClient, VisionClient};
use super::StructuringError;

/// Ollama HTTP client for local LLM and vision inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StructuringError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StructuringError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    /// Default Ollama instance at localhost:11434 with a 5-minute timeout.
    pub fn default_local() -> Result<Self, StructuringError> {
        Self::new("http://localhost:11434", Duration::from_secs(300))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, e: reqwest::Error) -> StructuringError {
        if e.is_connect() {
            StructuringError::OllamaConnection(self.base_url.clone())
        } else if e.is_timeout() {
            StructuringError::HttpClient(format!("Request timed out after {}s", self.timeout_secs))
        } else {
            StructuringError::HttpClient(e.to_string())
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, StructuringError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StructuringError::OllamaError {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| StructuringError::ResponseParsing(e.to_string()))
    }
}

/// Deterministic sampling for extraction work.
#[derive(Serialize)]
struct GenerationOptions {
    temperature: f32,
}

const EXTRACTION_OPTIONS: GenerationOptions = GenerationOptions { temperature: 0.0 };

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a serde_json::Value>,
    options: &'a GenerationOptions,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Request body for Ollama /api/chat with image attachments.
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: &'a GenerationOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<&'a [String]>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        format: Option<&serde_json::Value>,
    ) -> Result<String, StructuringError> {
        let body = GenerateRequest {
            model,
            prompt,
            system,
            stream: false,
            format,
            options: &EXTRACTION_OPTIONS,
        };
        let parsed: GenerateResponse = self.post_json("/api/generate", &body).await?;
        Ok(parsed.response)
    }

    async fn list_models(&self) -> Result<Vec<String>, StructuringError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StructuringError::OllamaError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TagsResponse = response
            .json()
            .await
            .map_err(|e| StructuringError::ResponseParsing(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl VisionClient for OllamaClient {
    async fn chat_with_images(
        &self,
        model: &str,
        prompt: &str,
        images: &[String],
        system: Option<&str>,
    ) -> Result<String, StructuringError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
                images: None,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
            images: Some(images),
        });

        let body = ChatRequest {
            model,
            messages,
            stream: false,
            options: &EXTRACTION_OPTIONS,
        };
        let parsed: ChatResponse = self.post_json("/api/chat", &body).await?;
        Ok(parsed.message.content)
    }
}

/// `[namespace/]model[:tag]`, at most one namespace level.
static MODEL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*(/[a-zA-Z0-9][a-zA-Z0-9._-]*)?(:[a-zA-Z0-9._-]+)?$")
        .expect("static regex")
});

/// Validate a model name against the Ollama naming convention.
pub fn validate_model_name(name: &str) -> Result<(), StructuringError> {
    if MODEL_NAME.is_match(name) {
        Ok(())
    } else {
        Err(StructuringError::InvalidModelName(name.to_string()))
    }
}

/// An installed model satisfies `wanted` on an exact match, or on any tag
/// when `wanted` carries none (`llama3.2-vision` matches `llama3.2-vision:latest`).
fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted
        || (!wanted.contains(':') && installed.split(':').next() == Some(wanted))
}

/// Fail with `ModelNotFound` unless every model in `wanted` is installed.
pub async fn ensure_models_available(
    llm: &dyn LlmClient,
    wanted: &[&str],
) -> Result<(), StructuringError> {
    let installed = llm.list_models().await?;
    for model in wanted {
        if !installed.iter().any(|m| model_matches(m, model)) {
            tracing::warn!(model = %model, installed = installed.len(), "Configured model not installed");
            return Err(StructuringError::ModelNotFound(model.to_string()));
        }
    }
    Ok(())
}

// ── Mocks for testing ─────────────────────────────────────

/// Mock LLM client returning a configurable response and recording the
/// last prompt it was given.
pub struct MockLlmClient {
    response: Result<String, String>,
    available_models: Vec<String>,
    last_prompt: Mutex<Option<String>>,
    last_format: Mutex<Option<serde_json::Value>>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: Ok(response.to_string()),
            available_models: vec!["qwen2.5:7b".to_string()],
            last_prompt: Mutex::new(None),
            last_format: Mutex::new(None),
        }
    }

    /// A client whose every call fails as if Ollama were unreachable.
    pub fn unreachable() -> Self {
        Self {
            response: Err("http://localhost:11434".to_string()),
            ..Self::new("")
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.available_models = models;
        self
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().ok().and_then(|p| p.clone())
    }

    pub fn last_format(&self) -> Option<serde_json::Value> {
        self.last_format.lock().ok().and_then(|f| f.clone())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(
        &self,
        _model: &str,
        prompt: &str,
        _system: &str,
        format: Option<&serde_json::Value>,
    ) -> Result<String, StructuringError> {
        if let Ok(mut slot) = self.last_prompt.lock() {
            *slot = Some(prompt.to_string());
        }
        if let Ok(mut slot) = self.last_format.lock() {
            *slot = format.cloned();
        }
        self.response
            .clone()
            .map_err(StructuringError::OllamaConnection)
    }

    async fn list_models(&self) -> Result<Vec<String>, StructuringError> {
        Ok(self.available_models.clone())
    }
}

/// Mock vision client returning a fixed transcription.
pub struct MockVisionClient {
    response: Result<String, String>,
}

impl MockVisionClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: Ok(response.to_string()),
        }
    }

    pub fn failing(body: &str) -> Self {
        Self {
            response: Err(body.to_string()),
        }
    }
}

#[async_trait]
impl VisionClient for MockVisionClient {
    async fn chat_with_images(
        &self,
        _model: &str,
        _prompt: &str,
        _images: &[String],
        _system: Option<&str>,
    ) -> Result<String, StructuringError> {
        self.response
            .clone()
            .map_err(|body| StructuringError::OllamaError { status: 500, body })
    }
}
