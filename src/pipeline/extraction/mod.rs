pub mod types;
pub mod mode;
pub mod pdf;
pub mod runtime;
pub mod pdfium;
pub mod vision_ocr;

pub use types::*;
pub use mode::*;
pub use pdf::*;
pub use runtime::*;
pub use pdfium::*;
pub use vision_ocr::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF is password-protected or uses unsupported encryption")]
    PdfEncrypted,

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("PDF runtime has not been initialized")]
    RuntimeNotInitialized,

    #[error("PDF runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("OCR returned no text for page {0}")]
    EmptyRecognition(usize),
}
