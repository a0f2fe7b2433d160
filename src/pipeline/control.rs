//! Conversion stage tracking and cancellation.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

/// Pipeline stages in execution order. `Error` is reachable from any
/// non-terminal stage; there are no retry transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    ExtractingText,
    SelectingMode,
    DirectTextReady,
    Rasterizing,
    Recognizing,
    Structuring,
    Sanitizing,
    Formatting,
    Done,
    Error,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ExtractingText => "extracting_text",
            Self::SelectingMode => "selecting_mode",
            Self::DirectTextReady => "direct_text_ready",
            Self::Rasterizing => "rasterizing",
            Self::Recognizing => "recognizing",
            Self::Structuring => "structuring",
            Self::Sanitizing => "sanitizing",
            Self::Formatting => "formatting",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to one conversion: observe its stage, or cancel it.
///
/// Cheap to clone; all clones refer to the same conversion.
#[derive(Debug, Clone)]
pub struct ConversionHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    cancel: watch::Sender<bool>,
    stage: watch::Sender<PipelineStage>,
}

impl ConversionHandle {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        let (stage, _) = watch::channel(PipelineStage::Idle);
        Self {
            inner: Arc::new(HandleInner { cancel, stage }),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    /// Resolves once `cancel()` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.cancel.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    pub fn stage(&self) -> PipelineStage {
        *self.inner.stage.borrow()
    }

    pub fn subscribe_stage(&self) -> watch::Receiver<PipelineStage> {
        self.inner.stage.subscribe()
    }

    pub(crate) fn set_stage(&self, stage: PipelineStage) {
        let previous = self.inner.stage.send_replace(stage);
        if previous != stage {
            tracing::debug!(from = %previous, to = %stage, "Pipeline stage");
        }
    }
}

impl Default for ConversionHandle {
    fn default() -> Self {
        Self::new()
    }
}
