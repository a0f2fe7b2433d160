//! Statement conversion orchestrator.
//!
//! Single entry point that drives the full pipeline:
//! text layer → mode selection → (rasterize → OCR) → structured extraction
//! → sanitization → table.
//!
//! Uses trait-based DI for every engine so the orchestrator stays fully
//! testable with mock implementations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use super::control::{ConversionHandle, PipelineStage};
use super::extraction::{
    init_pdf_runtime, select_extraction_mode_with_threshold, ExtractionError, ExtractionMode,
    OllamaVisionOcr, OpticalTextRecognizer, PageRasterizer, PdfTextLayer, PdfiumRasterizer,
    TextLayerExtractor,
};
use super::structuring::{
    ensure_models_available, interpret_payload, sanitize_records, validate_model_name,
    ExtractionRequest, LlmClient, OllamaClient, OllamaTransactionExtractor, StructuringError,
    TransactionExtractor, TransactionRecord,
};
use super::table::{format_table, TableMatrix};
use crate::pipeline_config::PipelineConfig;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that end a conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Structuring failed: {0}")]
    Structuring(#[from] StructuringError),

    #[error("Stage {stage} timed out after {after_secs}s")]
    TimedOut { stage: PipelineStage, after_secs: u64 },

    #[error("Conversion cancelled during {stage}")]
    Cancelled { stage: PipelineStage },

    #[error("Conversion quota exceeded")]
    QuotaExceeded { retry_after_ms: Option<u64> },
}

/// Failure taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ExtractionFailure,
    RasterizationFailure,
    RecognitionFailure,
    StructuringFailure,
    TimedOut,
    Cancelled,
    QuotaExceeded,
}

impl ConversionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Extraction(e) => match e {
                ExtractionError::PdfParsing(_) | ExtractionError::PdfEncrypted => {
                    FailureKind::ExtractionFailure
                }
                ExtractionError::PdfRendering { .. }
                | ExtractionError::ImageProcessing(_)
                | ExtractionError::RuntimeNotInitialized
                | ExtractionError::RuntimeUnavailable(_) => FailureKind::RasterizationFailure,
                ExtractionError::OcrProcessing(_) | ExtractionError::EmptyRecognition(_) => {
                    FailureKind::RecognitionFailure
                }
            },
            Self::Structuring(_) => FailureKind::StructuringFailure,
            Self::TimedOut { .. } => FailureKind::TimedOut,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::QuotaExceeded { .. } => FailureKind::QuotaExceeded,
        }
    }

    /// Message suitable for showing to the person who uploaded the statement.
    pub fn user_message(&self) -> String {
        match self {
            Self::Extraction(ExtractionError::PdfEncrypted) => {
                "This PDF is password-protected. Remove the password and try again.".into()
            }
            Self::QuotaExceeded {
                retry_after_ms: Some(ms),
            } => format!(
                "You have reached your conversion limit. Try again in {} seconds.",
                ms.div_ceil(1000)
            ),
            _ => match self.kind() {
                FailureKind::ExtractionFailure => {
                    "We couldn't read this PDF. Check that it is a valid, unprotected statement.".into()
                }
                FailureKind::RasterizationFailure => {
                    "We couldn't render this scanned statement for reading. Please try again.".into()
                }
                FailureKind::RecognitionFailure => {
                    "We couldn't read the text on this scanned statement. Try a clearer scan.".into()
                }
                FailureKind::StructuringFailure => {
                    "We couldn't identify the transactions in this statement. Please try again.".into()
                }
                FailureKind::TimedOut => "The conversion took too long. Please try again.".into(),
                FailureKind::Cancelled => "The conversion was cancelled.".into(),
                FailureKind::QuotaExceeded => "You have reached your conversion limit.".into(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Non-fatal conditions reported alongside a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversionWarning {
    /// The extractor payload had no usable `transactions` array.
    MalformedResponse { reason: String },
    /// Records dropped for an empty date or description.
    RecordsDropped { count: usize },
    /// Array items skipped because they broke the record shape.
    ContractViolations { count: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    pub conversion_id: Uuid,
    pub mode: ExtractionMode,
    pub transactions: Vec<TransactionRecord>,
    pub table: TableMatrix,
    pub warnings: Vec<ConversionWarning>,
}

/// One statement to convert.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub pdf_bytes: Vec<u8>,
    /// Page rasterized when the document has no usable text layer.
    pub page_index: usize,
}

impl ConversionRequest {
    pub fn new(pdf_bytes: Vec<u8>) -> Self {
        Self {
            pdf_bytes,
            page_index: 0,
        }
    }

    pub fn with_page(mut self, page_index: usize) -> Self {
        self.page_index = page_index;
        self
    }
}

// ---------------------------------------------------------------------------
// Quota
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub retry_after_ms: Option<u64>,
}

impl QuotaDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_ms: None,
        }
    }

    pub fn deny(retry_after_ms: Option<u64>) -> Self {
        Self {
            allowed: false,
            retry_after_ms,
        }
    }
}

/// Usage limit check owned by the caller's account system.
#[async_trait]
pub trait QuotaGate: Send + Sync {
    async fn check_allowed(&self, identity: &str) -> QuotaDecision;
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Converts statement PDFs into transactions and a table.
///
/// Stateless between conversions; share it behind an `Arc`.
pub struct StatementConverter {
    text_layer: Arc<dyn TextLayerExtractor>,
    rasterizer: Arc<dyn PageRasterizer>,
    recognizer: Arc<dyn OpticalTextRecognizer>,
    extractor: Arc<dyn TransactionExtractor>,
    config: PipelineConfig,
}

impl StatementConverter {
    pub fn new(
        text_layer: Arc<dyn TextLayerExtractor>,
        rasterizer: Arc<dyn PageRasterizer>,
        recognizer: Arc<dyn OpticalTextRecognizer>,
        extractor: Arc<dyn TransactionExtractor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            text_layer,
            rasterizer,
            recognizer,
            extractor,
            config,
        }
    }

    /// Production wiring: pdf-extract text layer, PDFium rasterizer, and
    /// Ollama for OCR and extraction. Initializes the PDF runtime. Does not
    /// contact Ollama; see [`StatementConverter::connect`].
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConversionError> {
        let client = Self::ollama_client(config)?;
        Self::wire(config, client)
    }

    /// Like [`StatementConverter::from_config`], but first checks that both
    /// configured models are installed in Ollama.
    pub async fn connect(config: &PipelineConfig) -> Result<Self, ConversionError> {
        let client = Self::ollama_client(config)?;
        preflight_models(client.as_ref(), config).await?;
        Self::wire(config, client)
    }

    fn ollama_client(config: &PipelineConfig) -> Result<Arc<OllamaClient>, ConversionError> {
        validate_model_name(&config.vision_model)?;
        validate_model_name(&config.structuring_model)?;
        Ok(Arc::new(OllamaClient::new(&config.ollama_base_url, config.http_timeout())?))
    }

    fn wire(config: &PipelineConfig, client: Arc<OllamaClient>) -> Result<Self, ConversionError> {
        init_pdf_runtime(config.pdfium_library_path.as_deref())?;
        let recognizer = OllamaVisionOcr::new(client.clone(), config.vision_model.clone());
        let extractor = OllamaTransactionExtractor::new(client, &config.structuring_model)
            .with_max_input_chars(config.max_input_chars);

        tracing::info!(
            ollama = %config.ollama_base_url,
            vision_model = %config.vision_model,
            structuring_model = %config.structuring_model,
            "Statement converter ready"
        );

        Ok(Self::new(
            Arc::new(PdfTextLayer),
            Arc::new(PdfiumRasterizer),
            Arc::new(recognizer),
            Arc::new(extractor),
            config.clone(),
        ))
    }

    /// Swap the structured extraction engine (e.g. for `RuleBasedExtractor`).
    pub fn with_extractor(mut self, extractor: Arc<dyn TransactionExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn convert(&self, request: ConversionRequest) -> Result<ConversionOutput, ConversionError> {
        self.convert_with_handle(request, &ConversionHandle::new()).await
    }

    /// Consult the quota gate, then convert.
    pub async fn convert_gated(
        &self,
        gate: &dyn QuotaGate,
        identity: &str,
        request: ConversionRequest,
        handle: &ConversionHandle,
    ) -> Result<ConversionOutput, ConversionError> {
        let decision = gate.check_allowed(identity).await;
        if !decision.allowed {
            tracing::warn!(retry_after_ms = ?decision.retry_after_ms, "Conversion refused by quota gate");
            handle.set_stage(PipelineStage::Error);
            return Err(ConversionError::QuotaExceeded {
                retry_after_ms: decision.retry_after_ms,
            });
        }
        self.convert_with_handle(request, handle).await
    }

    /// Convert, reporting stages through `handle` and honoring its cancellation.
    pub async fn convert_with_handle(
        &self,
        request: ConversionRequest,
        handle: &ConversionHandle,
    ) -> Result<ConversionOutput, ConversionError> {
        let conversion_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "conversion",
            %conversion_id,
            pdf_size = request.pdf_bytes.len(),
        );

        let result = self.run(conversion_id, request, handle).instrument(span.clone()).await;

        let _entered = span.enter();
        match &result {
            Ok(output) => {
                handle.set_stage(PipelineStage::Done);
                tracing::info!(
                    mode = output.mode.as_str(),
                    records = output.transactions.len(),
                    warnings = output.warnings.len(),
                    "Conversion complete"
                );
            }
            Err(e) => {
                let failed_at = handle.stage();
                handle.set_stage(PipelineStage::Error);
                tracing::warn!(stage = %failed_at, kind = ?e.kind(), error = %e, "Conversion failed");
            }
        }
        result
    }

    async fn run(
        &self,
        conversion_id: Uuid,
        request: ConversionRequest,
        handle: &ConversionHandle,
    ) -> Result<ConversionOutput, ConversionError> {
        checkpoint(handle)?;
        let page_index = request.page_index;
        let pdf: Arc<[u8]> = request.pdf_bytes.into();

        // ── Text layer ──
        handle.set_stage(PipelineStage::ExtractingText);
        let text = {
            let layer = Arc::clone(&self.text_layer);
            let bytes = Arc::clone(&pdf);
            guarded(handle, PipelineStage::ExtractingText, None, async move {
                let text = tokio::task::spawn_blocking(move || layer.extract_text(&bytes))
                    .await
                    .map_err(|e| ExtractionError::PdfParsing(format!("Text extraction task failed: {e}")))??;
                Ok(text)
            })
            .await?
        };

        // ── Mode ──
        handle.set_stage(PipelineStage::SelectingMode);
        let mode = select_extraction_mode_with_threshold(&text, self.config.text_native_threshold);
        tracing::info!(
            mode = mode.as_str(),
            text_length = text.chars().count(),
            "Extraction mode selected"
        );

        let raw_text = match mode {
            ExtractionMode::TextNative => {
                handle.set_stage(PipelineStage::DirectTextReady);
                text
            }
            ExtractionMode::ImageBased => {
                drop(text);
                self.recognize_page(pdf, page_index, handle).await?
            }
        };

        // ── Structured extraction ──
        checkpoint(handle)?;
        handle.set_stage(PipelineStage::Structuring);
        let extraction_request = ExtractionRequest {
            raw_text,
            source: mode,
        };
        let payload = guarded(
            handle,
            PipelineStage::Structuring,
            Some(self.config.structuring_timeout()),
            async {
                self.extractor
                    .extract(&extraction_request)
                    .await
                    .map_err(ConversionError::from)
            },
        )
        .await?;
        drop(extraction_request);

        let batch = interpret_payload(payload)?;
        let mut warnings = Vec::new();
        if let Some(reason) = batch.malformed {
            tracing::warn!(engine = self.extractor.name(), %reason, "Extractor payload malformed; treating as no transactions");
            warnings.push(ConversionWarning::MalformedResponse { reason });
        }
        if batch.contract_violations > 0 {
            tracing::warn!(
                engine = self.extractor.name(),
                skipped = batch.contract_violations,
                "Transactions skipped for breaking the record shape"
            );
            warnings.push(ConversionWarning::ContractViolations {
                count: batch.contract_violations,
            });
        }

        // ── Sanitize ──
        checkpoint(handle)?;
        handle.set_stage(PipelineStage::Sanitizing);
        let outcome = sanitize_records(batch.records);
        if outcome.dropped > 0 {
            tracing::warn!(dropped = outcome.dropped, "Records without date or description dropped");
            warnings.push(ConversionWarning::RecordsDropped {
                count: outcome.dropped,
            });
        }

        // ── Table ──
        checkpoint(handle)?;
        handle.set_stage(PipelineStage::Formatting);
        let table = format_table(&outcome.records);

        Ok(ConversionOutput {
            conversion_id,
            mode,
            transactions: outcome.records,
            table,
            warnings,
        })
    }

    /// Rasterize one page and hand it to the recognizer.
    async fn recognize_page(
        &self,
        pdf: Arc<[u8]>,
        page_index: usize,
        handle: &ConversionHandle,
    ) -> Result<String, ConversionError> {
        checkpoint(handle)?;
        handle.set_stage(PipelineStage::Rasterizing);
        let image = {
            let rasterizer = Arc::clone(&self.rasterizer);
            let scale = self.config.raster_scale;
            guarded(handle, PipelineStage::Rasterizing, None, async move {
                let image = tokio::task::spawn_blocking(move || rasterizer.render_page(&pdf, page_index, scale))
                    .await
                    .map_err(|e| ExtractionError::PdfRendering {
                        page: page_index,
                        reason: format!("Rasterization task failed: {e}"),
                    })??;
                Ok(image)
            })
            .await?
        };
        tracing::info!(page = page_index, width = image.width, height = image.height, "Page rasterized");

        handle.set_stage(PipelineStage::Recognizing);
        let recognized = guarded(
            handle,
            PipelineStage::Recognizing,
            Some(self.config.ocr_timeout()),
            async { self.recognizer.recognize(&image).await.map_err(ConversionError::from) },
        )
        .await?;

        if recognized.extracted_text.trim().is_empty() {
            return Err(ExtractionError::EmptyRecognition(page_index).into());
        }
        tracing::info!(
            page = page_index,
            text_length = recognized.extracted_text.chars().count(),
            "Page recognized"
        );
        Ok(recognized.extracted_text)
    }
}

/// Both configured models must be installed before any conversion starts.
async fn preflight_models(llm: &dyn LlmClient, config: &PipelineConfig) -> Result<(), ConversionError> {
    ensure_models_available(llm, &[config.vision_model.as_str(), config.structuring_model.as_str()]).await?;
    Ok(())
}

/// Fail fast when cancellation was requested between stages.
fn checkpoint(handle: &ConversionHandle) -> Result<(), ConversionError> {
    if handle.is_cancelled() {
        return Err(ConversionError::Cancelled {
            stage: handle.stage(),
        });
    }
    Ok(())
}

/// Run one stage, racing it against cancellation and an optional time limit.
/// The losing future is dropped, which aborts any in-flight request.
async fn guarded<T, F>(
    handle: &ConversionHandle,
    stage: PipelineStage,
    limit: Option<Duration>,
    work: F,
) -> Result<T, ConversionError>
where
    F: Future<Output = Result<T, ConversionError>>,
{
    let bounded = async {
        match limit {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| ConversionError::TimedOut {
                    stage,
                    after_secs: limit.as_secs(),
                })?,
            None => work.await,
        }
    };

    tokio::select! {
        biased;
        _ = handle.cancelled() => Err(ConversionError::Cancelled { stage }),
        result = bounded => result,
    }
}
