//! Utility functions for GHI
//!
//! This crate provides the single canonicalization path for source locators
//! (remote URLs, scp-like addresses, local paths) and the stable hash used as
//! the cache key and on-disk directory name for a source.

use thiserror::Error;

pub mod locator;

pub use locator::{
    canonicalize_locator, is_remote_locator, source_key, CanonicalLocator, LocatorKind, SourceKey,
    SOURCE_KEY_LEN,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UtilsError {
    #[error("Invalid source locator `{0}`")]
    InvalidLocator(String),

    #[error("Failed to resolve local path `{path}`: {reason}")]
    PathResolution { path: String, reason: String },
}
