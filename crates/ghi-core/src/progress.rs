//! Structured progress events for long-running cache and ingestion work.
//!
//! The core never renders progress itself. Callers attach a
//! [`ProgressCallback`] and turn events into whatever UI they have.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

/// A progress event emitted by the cache or the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ProgressEvent {
    /// A fresh clone started. `depth` is `None` for full history.
    CloneStarted { url: String, depth: Option<u32> },
    CloneFinished { url: String, elapsed_ms: u64 },
    /// A refresh or deepening fetch started.
    FetchStarted { path: PathBuf, depth: Option<u32> },
    Deepened { path: PathBuf, depth: u32 },
    Unshallowed { path: PathBuf },
    CacheHit { path: PathBuf },
    CacheInvalidated { source_key: String, reason: String },
    /// The removal ladder moved on to the named strategy.
    RemovalEscalated { path: PathBuf, strategy: String },
    CandidatesExtracted { count: usize },
    /// `chunk` is 1-based.
    ExistenceChunkChecked {
        chunk: usize,
        chunks: usize,
        existing: usize,
    },
    ExistenceChunkFailedOpen { chunk: usize, reason: String },
}

/// Callback invoked for every [`ProgressEvent`].
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Optional progress callback holder.
#[derive(Clone, Default)]
pub struct Progress(Option<ProgressCallback>);

impl Progress {
    pub fn new(callback: ProgressCallback) -> Self {
        Self(Some(callback))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.0 {
            callback(&event);
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Progress")
            .field(&self.0.as_ref().map(|_| "callback"))
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
