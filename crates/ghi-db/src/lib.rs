//! # ghi-db
//!
//! Infrastructure layer for GHI - the downstream index seam.
//!
//! The ingestion core in `ghi-core` never talks to a concrete search or
//! embedding store. It only needs two things from downstream:
//!
//! - bounded existence queries ("which of these IDs already exist for this source?")
//! - batch upsert of documents keyed by ID
//!
//! Both are expressed by [`IndexQueryPort`]. Real deployments implement it
//! against their store; this crate ships a simple JSONL backend for tests and
//! small local setups.
//!
//! ## Architecture
//!
//! ```text
//! application → ghi-core → (IndexQueryPort)
//!                  ↑
//!               ghi-db (trait + SimpleFileIndex)
//! ```
//!
//! ## Features
//!
//! - `simple` (default): file-based reference backend
//!
//! ## Usage
//!
//! ```ignore
//! use ghi_db::index::{IndexConfig, IndexDocument, open_index};
//!
//! let index = open_index(&IndexConfig::new("/path/to/index"))?;
//! index.upsert(&[IndexDocument::new("abc123", "3f9a0c1d2e4b5a67")])?;
//! let existing = index.exists_any("3f9a0c1d2e4b5a67", &["abc123".to_string()])?;
//! ```

pub mod error;
pub mod index;

pub use error::{DbError, DbResult};
pub use index::{IndexConfig, IndexDocument, IndexQueryPort};
