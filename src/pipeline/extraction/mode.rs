//! Text-native vs image-based decision.
//!
//! Short text is taken as evidence of a scan carrying only incidental
//! embedded strings (watermarks, bank logos rendered as text). The decision
//! is global for the document and made once on the full concatenated text.

use super::types::ExtractionMode;
use crate::pipeline_config::DEFAULT_TEXT_NATIVE_THRESHOLD;

/// Classify with the default threshold of 100 characters.
pub fn select_extraction_mode(text: &str) -> ExtractionMode {
    select_extraction_mode_with_threshold(text, DEFAULT_TEXT_NATIVE_THRESHOLD)
}

/// Length strictly greater than `threshold` characters ⇒ `TextNative`.
pub fn select_extraction_mode_with_threshold(text: &str, threshold: usize) -> ExtractionMode {
    if text.chars().count() > threshold {
        ExtractionMode::TextNative
    } else {
        ExtractionMode::ImageBased
    }
}
