//! Error types for Breeze

use thiserror::Error;

/// Result type alias for Breeze operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Breeze
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// A tool is registered with a broken definition. Unlike [`Error::Tool`]
    /// this is never reported back to the model.
    #[error("Tool wiring error: {0}")]
    ToolWiring(String),

    #[error("Forum error: {0}")]
    Forum(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Unsupported image/PDF format, source: {reference}")]
    UnsupportedFormat { reference: String },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same request later has a chance of succeeding.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Api { status, .. } => matches!(status, 408 | 429 | 500..=599),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
