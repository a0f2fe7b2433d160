//! Pipeline configuration.
//!
//! Concrete values for the mode heuristic, rasterization, collaborator
//! endpoints and the time budget of the two external calls. Every value
//! can be overridden from the environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::config;

// ═══════════════════════════════════════════════════════════
// Defaults
// ═══════════════════════════════════════════════════════════

/// Extracted text longer than this many characters is treated as text-native.
pub const DEFAULT_TEXT_NATIVE_THRESHOLD: usize = 100;

/// Upscaling factor applied to the page's native size when rasterizing.
pub const DEFAULT_RASTER_SCALE: f32 = 1.5;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_VISION_MODEL: &str = "llama3.2-vision";
pub const DEFAULT_STRUCTURING_MODEL: &str = "qwen2.5:7b";

pub const DEFAULT_OCR_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_STRUCTURING_TIMEOUT_SECS: u64 = 180;

/// Maximum characters of statement text sent to the structuring model.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 50_000;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Character count above which the text layer is trusted.
    pub text_native_threshold: usize,
    /// Rasterization scale relative to native page size.
    pub raster_scale: f32,
    /// Base URL of the Ollama instance hosting both models.
    pub ollama_base_url: String,
    /// Vision model used for OCR of scanned pages.
    pub vision_model: String,
    /// Text model used for schema-constrained transaction extraction.
    pub structuring_model: String,
    pub ocr_timeout_secs: u64,
    pub structuring_timeout_secs: u64,
    pub max_input_chars: usize,
    /// Explicit PDFium library path. None = discovery.
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            text_native_threshold: DEFAULT_TEXT_NATIVE_THRESHOLD,
            raster_scale: DEFAULT_RASTER_SCALE,
            ollama_base_url: DEFAULT_OLLAMA_URL.into(),
            vision_model: DEFAULT_VISION_MODEL.into(),
            structuring_model: DEFAULT_STRUCTURING_MODEL.into(),
            ocr_timeout_secs: DEFAULT_OCR_TIMEOUT_SECS,
            structuring_timeout_secs: DEFAULT_STRUCTURING_TIMEOUT_SECS,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            pdfium_library_path: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `LEDGERSCAN_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(url) = non_empty(lookup(config::ENV_OLLAMA_URL)) {
            cfg.ollama_base_url = url;
        }
        if let Some(model) = non_empty(lookup(config::ENV_VISION_MODEL)) {
            cfg.vision_model = model;
        }
        if let Some(model) = non_empty(lookup(config::ENV_STRUCTURING_MODEL)) {
            cfg.structuring_model = model;
        }
        if let Some(secs) = parse_var(&lookup, config::ENV_OCR_TIMEOUT_SECS) {
            cfg.ocr_timeout_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, config::ENV_STRUCTURING_TIMEOUT_SECS) {
            cfg.structuring_timeout_secs = secs;
        }
        if let Some(threshold) = parse_var(&lookup, config::ENV_TEXT_NATIVE_THRESHOLD) {
            cfg.text_native_threshold = threshold;
        }
        if let Some(scale) = parse_var::<f32, _>(&lookup, config::ENV_RASTER_SCALE) {
            if scale > 0.0 && scale.is_finite() {
                cfg.raster_scale = scale;
            } else {
                tracing::warn!(var = config::ENV_RASTER_SCALE, "Ignoring non-positive raster scale");
            }
        }
        if let Some(path) = non_empty(lookup(config::ENV_PDFIUM_LIB_PATH)) {
            cfg.pdfium_library_path = Some(PathBuf::from(path));
        }

        cfg
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs)
    }

    pub fn structuring_timeout(&self) -> Duration {
        Duration::from_secs(self.structuring_timeout_secs)
    }

    /// Transport timeout for the shared HTTP client: the longer stage budget.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs.max(self.structuring_timeout_secs))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = non_empty(lookup(key))?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
