//! Error types for ghi-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::constants::LONG_PATHS_HINT;

/// Domain-specific errors for GHI operations.
///
/// Only [`CloneFailed`](GhiError::CloneFailed), [`PathTooLong`](GhiError::PathTooLong)
/// and [`RemovalFailed`](GhiError::RemovalFailed) are meant to reach callers of the
/// cache. The remaining cache-side variants are recovered internally and only
/// appear in logs.
#[derive(Error, Debug)]
pub enum GhiError {
    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}. {hint}")]
    InvalidConfiguration {
        /// Description of the invalid configuration.
        message: String,
        /// Actionable hint on how to fix it.
        hint: String,
    },

    /// The source locator could not be canonicalized.
    #[error(transparent)]
    Locator(#[from] ghi_utils::UtilsError),

    // =========================================================================
    // Cache Errors (surfaced)
    // =========================================================================
    /// Cloning a source failed (network, auth, disk).
    ///
    /// Any partially created working copy has already been removed.
    #[error("Failed to clone `{url}`: {reason}")]
    CloneFailed {
        /// The source that failed to clone.
        url: String,
        /// The underlying cause reported by git.
        reason: String,
    },

    /// Cloning failed because a checked-out path exceeded the platform limit.
    #[error("Failed to clone `{url}`: path too long. {hint}")]
    PathTooLong {
        /// The source that failed to clone.
        url: String,
        /// How to enable long path support.
        hint: String,
    },

    /// Every removal strategy was exhausted for a directory.
    #[error("Cannot remove directory {path} after {attempts} attempts. Manual cleanup required.")]
    RemovalFailed {
        /// The directory left behind.
        path: PathBuf,
        /// Total attempts across all strategies.
        attempts: u32,
    },

    // =========================================================================
    // Cache Errors (recovered internally)
    // =========================================================================
    /// A working copy is corrupted or points at an unexpected remote.
    #[error("Working copy at {path} failed validation: {reason}")]
    ValidationFailed {
        /// The working copy path.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// A downstream existence query failed.
    #[error("Existence query failed for source `{source_key}`: {reason}")]
    ExistenceQueryFailed {
        /// The source key being checked.
        source_key: String,
        /// Description of the failure.
        reason: String,
    },

    /// A git command failed outside of clone.
    #[error("git {command} failed: {reason}")]
    GitCommand {
        /// The git subcommand.
        command: String,
        /// Description of the failure.
        reason: String,
    },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// An I/O error occurred while reading or writing the cache record.
    #[error("Cache store I/O error at {path}: {message}")]
    CacheStoreIo {
        /// The record path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The downstream index is unavailable.
    #[error("Index `{backend}` unavailable: {reason}")]
    IndexUnavailable {
        /// Backend name or `downstream` when unknown.
        backend: String,
        /// Description of the failure.
        reason: String,
    },

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A wrapped generic error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GhiError {
    /// Create a path-too-long error with the standard remediation hint.
    pub fn path_too_long(url: impl Into<String>) -> Self {
        Self::PathTooLong {
            url: url.into(),
            hint: LONG_PATHS_HINT.to_string(),
        }
    }

    /// Whether this error is part of the cache's caller-facing taxonomy.
    pub fn is_surfaced(&self) -> bool {
        matches!(
            self,
            Self::CloneFailed { .. } | Self::PathTooLong { .. } | Self::RemovalFailed { .. }
        )
    }

    /// Operator-facing remediation, if the error has one.
    pub fn remediation_hint(&self) -> Option<String> {
        match self {
            Self::PathTooLong { hint, .. } => Some(hint.clone()),
            Self::RemovalFailed { path, .. } => Some(format!(
                "Close any program holding files under {} and delete it manually",
                path.display()
            )),
            Self::InvalidConfiguration { hint, .. } => Some(hint.clone()),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
