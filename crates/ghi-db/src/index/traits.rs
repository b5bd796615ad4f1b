//! Downstream index traits and core types.
//!
//! This module defines the seam between ingestion planning and whatever store
//! ends up holding the embedded commit documents.

use crate::error::DbResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// IndexDocument
// ============================================================================

/// A document to insert or update in the downstream index.
///
/// Documents are keyed by `(source_key, id)`. For commit ingestion the `id`
/// is the commit hash and the `payload` carries whatever the caller produced
/// (metadata, embedding reference, rendered text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    /// Unique identifier within the source (commit hash).
    pub id: String,

    /// Source key the document belongs to.
    pub source_key: String,

    /// JSON payload with metadata.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl IndexDocument {
    /// Create a new document with an empty payload.
    pub fn new(id: impl Into<String>, source_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_key: source_key.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ============================================================================
// IndexQueryPort
// ============================================================================

/// Trait for downstream index backends.
///
/// Implementations must be thread-safe (`Send + Sync`); existence chunks are
/// queried in parallel.
pub trait IndexQueryPort: Send + Sync {
    /// Return the subset of `ids` that already exist for `source_key`.
    ///
    /// Callers keep `ids` within the backend's query size limit; backends may
    /// reject larger requests with [`DbError::QueryTooLarge`](crate::DbError::QueryTooLarge).
    fn exists_any(&self, source_key: &str, ids: &[String]) -> DbResult<HashSet<String>>;

    /// Insert or update documents.
    ///
    /// Uses upsert semantics: a document with the same `(source_key, id)` is replaced.
    fn upsert(&self, documents: &[IndexDocument]) -> DbResult<()>;

    /// Number of documents stored for `source_key`.
    fn count(&self, source_key: &str) -> DbResult<usize>;

    /// Flush pending writes to persistent storage.
    fn flush(&self) -> DbResult<()> {
        Ok(())
    }

    /// Largest id list accepted by [`exists_any`](Self::exists_any), if bounded.
    fn max_ids_per_query(&self) -> Option<usize> {
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
