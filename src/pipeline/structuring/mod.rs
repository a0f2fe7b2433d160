pub mod types;
pub mod prompt;
pub mod parser;
pub mod sanitize;
pub mod ollama;
pub mod llm_extractor;
pub mod rules;

pub use types::*;
pub use prompt::*;
pub use parser::*;
pub use sanitize::*;
pub use ollama::*;
pub use llm_extractor::*;
pub use rules::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StructuringError {
    #[error("Ollama is not running at {0}")]
    OllamaConnection(String),

    #[error("Ollama returned error (status {status}): {body}")]
    OllamaError { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("JSON parsing error: {0}")]
    JsonParsing(String),

    #[error("Invalid model name: {0}")]
    InvalidModelName(String),

    #[error("Model not installed in Ollama: {0}")]
    ModelNotFound(String),

    #[error("Transaction extraction returned no result")]
    NoResult,
}
