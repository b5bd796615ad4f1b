//! Incremental ingestion orchestrator.
//!
//! [`IncrementalIndexer`] wires the clone cache, the planner, and the
//! downstream index together:
//!
//! ```text
//! count → plan → (short-circuit) → extract → dedup → deliver
//! ```
//!
//! Turning a commit into an [`IndexDocument`] (rendering, embedding) is the
//! caller's business; [`IncrementalIndexer::deliver`] takes it as a closure.

use std::sync::Arc;

use ghi_db::{IndexConfig, IndexDocument, IndexQueryPort};
use ghi_utils::SourceKey;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::RemoteSourceCache;
use crate::config::GhiConfig;
use crate::db_adapter::{candidate_document, open_index_port, IntoGhiResult};
use crate::errors::GhiError;
use crate::extract::extract_candidates;
use crate::git::{GitAccess, GitCli};
use crate::planner::{dedup_candidates, plan};
use crate::progress::{Progress, ProgressCallback};
use crate::types::{CommitCandidate, IndexingPlan, IndexingRequest};

// ============================================================================
// Outcomes
// ============================================================================

/// Result of [`IncrementalIndexer::prepare`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub source_key: SourceKey,
    pub plan: IndexingPlan,
    /// Commits to deliver, most recent first.
    pub new_candidates: Vec<CommitCandidate>,
    /// Extracted commits dropped because the index already has them.
    pub already_indexed: usize,
    /// Documents the index held for this source before planning.
    pub existing_count: usize,
    /// Existence chunks that failed and were treated as new.
    pub failed_open_chunks: usize,
}

/// Result of [`IncrementalIndexer::ingest`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub source_key: SourceKey,
    pub plan: IndexingPlan,
    pub delivered: usize,
    pub already_indexed: usize,
    pub failed_open_chunks: usize,
}

// ============================================================================
// IncrementalIndexer
// ============================================================================

/// Plans and delivers incremental commit ingestion for remote sources.
///
/// # Example
///
/// ```ignore
/// use ghi_core::{GhiConfig, IncrementalIndexer, IndexingRequest};
/// use ghi_db::IndexConfig;
///
/// let config = GhiConfig::load_default()?;
/// let indexer = IncrementalIndexer::from_config(&config, &IndexConfig::new("/var/lib/ghi/index"))?;
/// let report = indexer.ingest(&IndexingRequest::new("https://github.com/o/r").with_limit(500))?;
/// ```
pub struct IncrementalIndexer<G: GitAccess, P: IndexQueryPort + ?Sized> {
    cache: Arc<RemoteSourceCache<G>>,
    port: Arc<P>,
    progress: Progress,
}

impl IncrementalIndexer<GitCli, dyn IndexQueryPort> {
    /// Build an indexer over the `git` CLI and the configured index backend.
    pub fn from_config(config: &GhiConfig, index: &IndexConfig) -> Result<Self, GhiError> {
        let git = GitCli::new().with_timeout(config.cache.git_timeout());
        let cache = RemoteSourceCache::open(config.cache.clone(), git)?;
        let port = open_index_port(index)?;
        Ok(Self::new(Arc::new(cache), port))
    }
}

impl<G: GitAccess, P: IndexQueryPort + ?Sized> IncrementalIndexer<G, P> {
    pub fn new(cache: Arc<RemoteSourceCache<G>>, port: Arc<P>) -> Self {
        Self {
            cache,
            port,
            progress: Progress::none(),
        }
    }

    /// Attach a progress callback for dedup events.
    ///
    /// Cache events are reported through the cache's own callback.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Progress::new(callback);
        self
    }

    pub fn cache(&self) -> &RemoteSourceCache<G> {
        &self.cache
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Work out which commits of a source still need indexing.
    ///
    /// # Errors
    ///
    /// Cache failures propagate. A failing count query is treated as an empty
    /// index, and failing existence chunks as new commits.
    pub fn prepare(&self, request: &IndexingRequest) -> Result<IngestOutcome, GhiError> {
        let source = request.source_identifier.as_str();
        let source_key = self.cache.source_key(source)?;

        let existing_count = match self.port.count(source_key.as_str()).into_ghi_result() {
            Ok(count) => count,
            Err(e) => {
                warn!("Cannot count indexed commits for {}, assuming none: {}", source, e);
                0
            }
        };

        let plan = plan(request, existing_count, self.cache.config());
        debug!("Plan for {}: {:?}", source, plan);

        if plan.short_circuit {
            info!(
                "{} already has {} indexed commits, nothing to do",
                source, existing_count
            );
            return Ok(IngestOutcome {
                source_key,
                plan,
                new_candidates: Vec::new(),
                already_indexed: 0,
                existing_count,
                failed_open_chunks: 0,
            });
        }

        let candidates =
            extract_candidates(&self.cache, source, plan.fetch_depth, &plan.query(request))?;

        let (new_candidates, already_indexed, failed_open_chunks) = if request.dedup_enabled {
            let outcome = dedup_candidates(
                candidates,
                &source_key,
                &*self.port,
                self.cache.config().existence_chunk_size,
                &self.progress,
            );
            (outcome.new, outcome.existing, outcome.failed_chunks)
        } else {
            (candidates, 0, 0)
        };

        info!(
            "{}: {} new commits, {} already indexed",
            source,
            new_candidates.len(),
            already_indexed
        );

        Ok(IngestOutcome {
            source_key,
            plan,
            new_candidates,
            already_indexed,
            existing_count,
            failed_open_chunks,
        })
    }

    /// Convert and upsert the new candidates of `outcome`.
    ///
    /// Documents are upserted in batches of `existenceChunkSize`, then the
    /// index is flushed. Returns the number of documents delivered.
    pub fn deliver<F>(&self, outcome: &IngestOutcome, mut to_document: F) -> Result<usize, GhiError>
    where
        F: FnMut(&CommitCandidate) -> Result<IndexDocument, GhiError>,
    {
        if outcome.new_candidates.is_empty() {
            return Ok(0);
        }

        let batch_size = self.cache.config().existence_chunk_size.max(1);
        let mut delivered = 0;

        for batch in outcome.new_candidates.chunks(batch_size) {
            let documents = batch
                .iter()
                .map(&mut to_document)
                .collect::<Result<Vec<_>, _>>()?;
            self.port.upsert(&documents).into_ghi_result()?;
            delivered += documents.len();
            debug!("Delivered {}/{} documents", delivered, outcome.new_candidates.len());
        }

        self.port.flush().into_ghi_result()?;
        Ok(delivered)
    }

    /// [`prepare`](Self::prepare) then [`deliver`](Self::deliver) with the
    /// candidate itself as payload.
    pub fn ingest(&self, request: &IndexingRequest) -> Result<IngestReport, GhiError> {
        let outcome = self.prepare(request)?;
        let key = outcome.source_key.clone();
        let delivered = self.deliver(&outcome, |c| candidate_document(&key, c))?;

        Ok(IngestReport {
            source_key: outcome.source_key,
            plan: outcome.plan,
            delivered,
            already_indexed: outcome.already_indexed,
            failed_open_chunks: outcome.failed_open_chunks,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
