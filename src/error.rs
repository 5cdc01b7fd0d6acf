//! Custom error types for streetlens

use thiserror::Error;

/// Main error type for streetlens operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Qdrant error: {0}")]
    Qdrant(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Caption backend error: {0}")]
    Caption(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Remote handle no longer recognized: {0}")]
    HandleExpired(String),

    #[error("Download of {url} failed with HTTP {status}")]
    Download { url: String, status: u16 },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Not initialized: run 'streetlens init' first")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a bounded retry is worth attempting for this failure.
    ///
    /// Backend-side and transport failures are transient. Permanent download
    /// failures, expired handles and local/validation errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Caption(_) | Error::Upload(_) | Error::Embedding(_) | Error::Qdrant(_) => true,
            Error::Http(e) => !e.is_builder() && !e.is_decode(),
            Error::Io(_) => true,
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Other(format!("worker task failed: {}", err))
    }
}

/// Result type alias for streetlens
pub type Result<T> = std::result::Result<T, Error>;

/// Convert qdrant errors
impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::Qdrant(err.to_string())
    }
}
