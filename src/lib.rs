//! ledgerscan: bank statement PDFs in, validated transaction tables out.
//!
//! Digital statements are read from their text layer; scanned ones are
//! rasterized and transcribed by a vision model. Either way the text goes
//! through a structured extractor and comes back as sanitized
//! [`TransactionRecord`]s plus a [`TableMatrix`].

pub mod config;
pub mod pipeline;
pub mod pipeline_config;

use tracing_subscriber::EnvFilter;

pub use pipeline::control::{ConversionHandle, PipelineStage};
pub use pipeline::extraction::{ExtractionError, ExtractionMode};
pub use pipeline::processor::{
    ConversionError, ConversionOutput, ConversionRequest, ConversionWarning, FailureKind,
    QuotaDecision, QuotaGate, StatementConverter,
};
pub use pipeline::structuring::{RuleBasedExtractor, StructuringError, TransactionRecord};
pub use pipeline::table::{format_table, TableMatrix};
pub use pipeline_config::PipelineConfig;

/// Install the global `tracing` subscriber.
///
/// Honors `RUST_LOG`, falling back to [`config::default_log_filter`]. Safe to
/// call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();

    tracing::debug!("{} v{} tracing ready", config::APP_NAME, config::APP_VERSION);
}
