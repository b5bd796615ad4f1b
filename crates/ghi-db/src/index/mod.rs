//! Downstream index module for ghi-db.
//!
//! ## Available Backends
//!
//! - `simple` (default): JSONL file backend for testing/small indexes
//!
//! ## Usage
//!
//! ```ignore
//! use ghi_db::index::{IndexConfig, open_index};
//!
//! let index = open_index(&IndexConfig::new("/path/to/index"))?;
//! index.upsert(&documents)?;
//! let count = index.count(source_key)?;
//! ```

mod backend;
mod config;
mod traits;

pub use config::{IndexConfig, DATA_FILENAME, DEFAULT_BACKEND, DEFAULT_MAX_IDS_PER_QUERY};
pub use traits::{IndexDocument, IndexQueryPort};

pub use backend::{available_backends, open_index};

#[cfg(feature = "simple")]
pub use backend::SimpleFileIndex;
