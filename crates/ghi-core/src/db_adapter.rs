//! Adapter layer for ghi-db infrastructure.
//!
//! This module bridges the downstream index seam with ghi-core's domain types.
//! It provides:
//!
//! - Error conversion from `DbError` to `GhiError`
//! - A default `CommitCandidate` to `IndexDocument` conversion
//! - Opening a configured index backend as an `IndexQueryPort`
//!
//! ## Architecture
//!
//! ```text
//! ghi-core domain code (planner, indexer)
//!        ↓
//!   db_adapter (this module) - conversions
//!        ↓
//!     ghi-db (IndexQueryPort, SimpleFileIndex)
//! ```

use std::sync::Arc;

use ghi_db::{DbError, IndexConfig, IndexDocument, IndexQueryPort};
use ghi_utils::SourceKey;

use crate::errors::GhiError;
use crate::types::CommitCandidate;

// ============================================================================
// Error Conversion
// ============================================================================

/// Convert a ghi-db error to a ghi-core error.
pub fn from_db_error(err: DbError) -> GhiError {
    match err {
        DbError::Io(io_err) => GhiError::Io(io_err),

        DbError::Json(json_err) => GhiError::Json(json_err),

        DbError::QueryTooLarge { requested, max } => GhiError::InvalidConfiguration {
            message: format!(
                "Existence query of {} ids exceeds the index limit of {}",
                requested, max
            ),
            hint: format!("Set cache.existenceChunkSize to {} or less", max),
        },

        DbError::UnknownBackend { backend } => GhiError::IndexUnavailable {
            reason: format!("Unknown backend '{}'", backend),
            backend,
        },

        DbError::Config { message } => GhiError::InvalidConfiguration {
            message,
            hint: "Check the index configuration".to_string(),
        },

        DbError::IndexIo { path, message } | DbError::IndexParse { path, message } => {
            GhiError::IndexUnavailable {
                backend: path.display().to_string(),
                reason: message,
            }
        }

        DbError::Unavailable { message } | DbError::Internal { message } => {
            GhiError::IndexUnavailable {
                backend: "downstream".to_string(),
                reason: message,
            }
        }
    }
}

/// Extension trait to convert DbResult to Result<T, GhiError>.
pub trait IntoGhiResult<T> {
    /// Convert a DbResult to a GhiError result.
    fn into_ghi_result(self) -> Result<T, GhiError>;
}

impl<T> IntoGhiResult<T> for ghi_db::DbResult<T> {
    fn into_ghi_result(self) -> Result<T, GhiError> {
        self.map_err(from_db_error)
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Default document for a commit: the candidate itself as payload.
pub fn candidate_document(
    source_key: &SourceKey,
    candidate: &CommitCandidate,
) -> Result<IndexDocument, GhiError> {
    let payload = serde_json::to_value(candidate)?;
    Ok(IndexDocument::new(candidate.id.clone(), source_key.as_str()).with_payload(payload))
}

/// Open the configured index backend.
pub fn open_index_port(config: &IndexConfig) -> Result<Arc<dyn IndexQueryPort>, GhiError> {
    ghi_db::index::open_index(config).into_ghi_result()
}

// ============================================================================
// Tests
// ============================================================================
