//! # ghi-core
//!
//! **Git History Indexer** – remote-source clone cache and incremental
//! ingestion planning.
//!
//! This crate keeps local working copies of external repositories, extracts
//! commit history from them, and decides which commits still need to reach a
//! downstream index. It is a synchronous library: callers that serve many
//! sessions should run it on worker threads.
//!
//! ## Main Types
//!
//! - [`RemoteSourceCache`] – TTL-bound clone cache with on-demand deepening
//! - [`IncrementalIndexer`] – count, plan, extract, dedup, deliver
//! - [`GhiError`] – domain-specific error type
//!
//! ## Modules
//!
//! - [`config`] – configuration types (GhiConfig, CacheConfig)
//! - [`cache`] – the clone cache, its durable record, and forced removal
//! - [`git`] – the `GitAccess` seam and its `git` CLI implementation
//! - [`extract`] – candidate extraction with shallow-history retry
//! - [`planner`] – offset/limit planning and chunked dedup
//! - [`indexer`] – the ingestion orchestrator
//! - [`errors`] – error types
//!
//! ## Example
//!
//! ```ignore
//! use ghi_core::{GhiConfig, IncrementalIndexer, IndexingRequest};
//! use ghi_db::IndexConfig;
//!
//! let config = GhiConfig::load_default()?;
//! let indexer = IncrementalIndexer::from_config(&config, &IndexConfig::new("/var/lib/ghi"))?;
//!
//! // Make sure the latest 1000 commits are indexed
//! let request = IndexingRequest::new("https://github.com/rust-lang/cargo").with_limit(1000);
//! let report = indexer.ingest(&request)?;
//! println!("Delivered {} new commits", report.delivered);
//! ```

// Modules
pub mod cache;
pub mod config;
pub mod constants;
pub mod db_adapter;
pub mod errors;
pub mod extract;
pub mod git;
pub mod indexer;
pub mod planner;
pub(crate) mod process;
pub mod progress;
pub mod types;

// Re-exports for convenience
pub use cache::{
    CacheEntry, CacheEntryInfo, CacheInfo, CacheStore, RemovalLadder, RemovalOutcome,
    RemovalStrategy, RemoteSourceCache, RetryPolicy, TimeProvider,
};
pub use config::{
    CacheConfig, GhiConfig, RemovalConfig, DEFAULT_CLONE_DEPTH, DEFAULT_EXISTENCE_CHUNK_SIZE,
    DEFAULT_MAX_FETCH_COUNT, DEFAULT_TTL_SECS,
};
pub use db_adapter::{from_db_error, IntoGhiResult};
pub use errors::GhiError;
pub use extract::extract_candidates;
pub use git::{GitAccess, GitCli, GitError, GitResult};
pub use indexer::{IncrementalIndexer, IngestOutcome, IngestReport};
pub use planner::{dedup_candidates, plan, DedupOutcome};
pub use progress::{Progress, ProgressCallback, ProgressEvent};
pub use types::{
    ChangeKind, ChangedFile, CommitCandidate, CommitQuery, IndexingPlan, IndexingRequest,
};

pub use ghi_utils::{canonicalize_locator, source_key, SourceKey};
