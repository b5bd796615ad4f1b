//! Error types for ghi-db.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ghi-db operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in ghi-db operations.
#[derive(Debug, Error)]
pub enum DbError {
    // ========================================================================
    // Index errors
    // ========================================================================
    /// Index I/O error.
    #[error("Index I/O error at {path}: {message}")]
    IndexIo { path: PathBuf, message: String },

    /// Index parse error.
    #[error("Index parse error at {path}: {message}")]
    IndexParse { path: PathBuf, message: String },

    /// Existence query exceeded the backend's expression size limit.
    #[error("Existence query too large: {requested} ids (max {max})")]
    QueryTooLarge { requested: usize, max: usize },

    /// Backend could not be reached or rejected the request.
    #[error("Index backend unavailable: {message}")]
    Unavailable { message: String },

    /// Unknown backend name.
    #[error("Unknown index backend: {backend}")]
    UnknownBackend { backend: String },

    // ========================================================================
    // General errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error wrapper.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an index I/O error.
    pub fn index_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::IndexIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an index parse error.
    pub fn index_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::IndexParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unavailable-backend error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
