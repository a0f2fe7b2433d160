/// Application-level constants
pub const APP_NAME: &str = "ledgerscan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variables read by `PipelineConfig::from_env`.
pub const ENV_OLLAMA_URL: &str = "LEDGERSCAN_OLLAMA_URL";
pub const ENV_VISION_MODEL: &str = "LEDGERSCAN_VISION_MODEL";
pub const ENV_STRUCTURING_MODEL: &str = "LEDGERSCAN_STRUCTURING_MODEL";
pub const ENV_OCR_TIMEOUT_SECS: &str = "LEDGERSCAN_OCR_TIMEOUT_SECS";
pub const ENV_STRUCTURING_TIMEOUT_SECS: &str = "LEDGERSCAN_STRUCTURING_TIMEOUT_SECS";
pub const ENV_TEXT_NATIVE_THRESHOLD: &str = "LEDGERSCAN_TEXT_NATIVE_THRESHOLD";
pub const ENV_RASTER_SCALE: &str = "LEDGERSCAN_RASTER_SCALE";

/// Standard pdfium-render variable pointing at the PDFium shared library.
pub const ENV_PDFIUM_LIB_PATH: &str = "PDFIUM_DYNAMIC_LIB_PATH";

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> String {
    format!("{}=info,warn", APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_ledgerscan() {
        assert_eq!(APP_NAME, "ledgerscan");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }

    #[test]
    fn default_filter_targets_crate() {
        let filter = default_log_filter();
        assert!(filter.starts_with("ledgerscan=info"));
        assert!(filter.ends_with("warn"));
    }

    #[test]
    fn env_names_share_prefix() {
        for name in [
            ENV_OLLAMA_URL,
            ENV_VISION_MODEL,
            ENV_STRUCTURING_MODEL,
            ENV_OCR_TIMEOUT_SECS,
            ENV_STRUCTURING_TIMEOUT_SECS,
            ENV_TEXT_NATIVE_THRESHOLD,
            ENV_RASTER_SCALE,
        ] {
            assert!(name.starts_with("LEDGERSCAN_"), "{name}");
        }
    }
}
