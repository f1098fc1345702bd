//! Error types for the harbor message archive.

use thiserror::Error;

/// Result type alias using harbor's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for harbor operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Source store read failed
    #[error("Source error: {0}")]
    Source(String),

    /// Archive store write failed
    #[error("Archive error: {0}")]
    Archive(String),

    /// Record failed structural validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Whether the error is a transient I/O failure: the current
    /// conversation aborts with its last flushed cursor intact, and the
    /// whole run is safe to retry later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Source(_) | Error::Archive(_)
        )
    }
}
