//! Index backend implementations.

#[cfg(feature = "simple")]
mod simple;

#[cfg(feature = "simple")]
pub use simple::SimpleFileIndex;

use super::config::IndexConfig;
use super::traits::IndexQueryPort;
use crate::error::{DbError, DbResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Open an index with the given configuration.
///
/// # Errors
///
/// Returns an error if:
/// - The directory is missing and `create_if_missing` is false
/// - The backend is not supported
/// - The index cannot be opened
pub fn open_index(config: &IndexConfig) -> DbResult<Arc<dyn IndexQueryPort>> {
    debug!("Opening index at {:?}", config.path);

    if !config.path.exists() {
        if !config.create_if_missing {
            return Err(DbError::Config {
                message: format!("Index directory not found: {}", config.path.display()),
            });
        }
        info!("Index not found, creating new index at {:?}", config.path);
        std::fs::create_dir_all(&config.path)
            .map_err(|e| DbError::index_io(&config.path, e.to_string()))?;
    }

    match config.backend.as_str() {
        #[cfg(feature = "simple")]
        "simple" => {
            let index = SimpleFileIndex::open(config)?;
            Ok(Arc::new(index))
        }

        backend => Err(DbError::UnknownBackend {
            backend: format!(
                "'{}'. Available backends: {}",
                backend,
                available_backends().join(", ")
            ),
        }),
    }
}

/// Get a list of available backend names.
#[allow(clippy::vec_init_then_push)]
pub fn available_backends() -> Vec<&'static str> {
    let mut backends = Vec::new();

    #[cfg(feature = "simple")]
    backends.push("simple");

    backends
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("index");
        let index = open_index(&IndexConfig::new(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(index.count("any").unwrap(), 0);
    }

    #[test]
    fn test_open_missing_without_create() {
        let temp = TempDir::new().unwrap();
        let config = IndexConfig::new(temp.path().join("missing")).with_create_if_missing(false);
        assert!(matches!(open_index(&config), Err(DbError::Config { .. })));
    }

    #[test]
    fn test_unknown_backend() {
        let temp = TempDir::new().unwrap();
        let config = IndexConfig::new(temp.path()).with_backend("lancedb");
        assert!(matches!(
            open_index(&config),
            Err(DbError::UnknownBackend { .. })
        ));
    }
}
