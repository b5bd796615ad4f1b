//! Index configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Constants
// ============================================================================

/// Default backend name.
pub const DEFAULT_BACKEND: &str = "simple";

/// Filename for the JSONL data file.
pub const DATA_FILENAME: &str = "documents.jsonl";

/// Default cap on ids per existence query.
pub const DEFAULT_MAX_IDS_PER_QUERY: usize = 800;

// ============================================================================
// IndexConfig
// ============================================================================

/// Configuration for creating or opening an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    /// Path to the index directory.
    pub path: PathBuf,

    /// Backend to use.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Maximum ids accepted by one existence query. `None` disables the check.
    #[serde(default = "default_max_ids_per_query")]
    pub max_ids_per_query: Option<usize>,

    /// Whether to create the index directory if it doesn't exist.
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn default_max_ids_per_query() -> Option<usize> {
    Some(DEFAULT_MAX_IDS_PER_QUERY)
}

fn default_create_if_missing() -> bool {
    true
}

impl IndexConfig {
    /// Create a new config for the given directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backend: default_backend(),
            max_ids_per_query: default_max_ids_per_query(),
            create_if_missing: true,
        }
    }

    /// Set the backend.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    /// Set the existence query cap.
    pub fn with_max_ids_per_query(mut self, max: Option<usize>) -> Self {
        self.max_ids_per_query = max;
        self
    }

    /// Set whether to create the index if missing.
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Path of the JSONL data file.
    pub fn data_path(&self) -> PathBuf {
        self.path.join(DATA_FILENAME)
    }
}
