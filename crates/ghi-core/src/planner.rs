//! Incremental index planning.
//!
//! Two callers share the `limit` field of an [`IndexingRequest`]:
//!
//! - **total target**: "make sure N commits of this source are indexed"
//! - **additional count**: "index N more commits starting at this offset"
//!
//! [`plan`] tells them apart and turns the request into an [`IndexingPlan`].
//! [`dedup_candidates`] then drops candidates the downstream index already
//! holds, querying it in bounded chunks.

use std::collections::HashSet;

use ghi_db::IndexQueryPort;
use ghi_utils::SourceKey;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::constants::DEFAULT_EXTRACTION_LIMIT;
use crate::db_adapter::from_db_error;
use crate::errors::GhiError;
use crate::progress::{Progress, ProgressEvent};
use crate::types::{CommitCandidate, IndexingPlan, IndexingRequest};

// ============================================================================
// plan
// ============================================================================

/// Resolve `request` against the number of commits already indexed.
///
/// The fetch cap (`maxFetchCount`) is applied after the existing count has
/// been subtracted from a total target.
pub fn plan(request: &IndexingRequest, existing_count: usize, config: &CacheConfig) -> IndexingPlan {
    let cap = config.max_fetch_count;
    let total_target = request.explicit_offset == 0
        && request.limit.is_some()
        && request.dedup_enabled
        && !request.has_date_bounds();

    let (skip_offset, uncapped) = match request.limit {
        Some(limit) if total_target => {
            if limit <= existing_count {
                debug!(
                    "Already {} commits indexed for target {}, nothing to fetch",
                    existing_count, limit
                );
                return IndexingPlan {
                    fetch_depth: 0,
                    skip_offset: existing_count,
                    resolved_limit: 0,
                    short_circuit: true,
                };
            }
            (existing_count, limit - existing_count)
        }
        limit => (request.explicit_offset, limit.unwrap_or(cap)),
    };

    let resolved_limit = uncapped.min(cap);
    if resolved_limit < uncapped {
        debug!("Capped fetch of {} commits to {}", uncapped, cap);
    }

    let fetch_depth = if config.default_clone_depth == 0 {
        0
    } else if skip_offset > 0 {
        let window = if request.limit.is_some() {
            resolved_limit
        } else {
            DEFAULT_EXTRACTION_LIMIT
        };
        clamp_depth(skip_offset.saturating_add(window))
    } else if request.has_date_bounds() {
        config.date_window_depth
    } else {
        clamp_depth(resolved_limit).max(config.default_clone_depth)
    };

    IndexingPlan {
        fetch_depth,
        skip_offset,
        resolved_limit,
        short_circuit: false,
    }
}

fn clamp_depth(depth: usize) -> u32 {
    u32::try_from(depth).unwrap_or(u32::MAX)
}

// ============================================================================
// dedup_candidates
// ============================================================================

/// Result of [`dedup_candidates`].
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Candidates not found downstream, in input order.
    pub new: Vec<CommitCandidate>,
    /// Number of candidates found downstream.
    pub existing: usize,
    /// Chunks whose existence query failed and were treated as all-new.
    pub failed_chunks: usize,
}

/// Drop candidates that already exist downstream for `source_key`.
///
/// Identifiers are checked in chunks of at most `chunk_size` (further bounded
/// by the port's own limit). Chunks are queried in parallel. A chunk whose
/// query fails is treated as entirely new; upsert absorbs any redelivery.
pub fn dedup_candidates<P: IndexQueryPort + ?Sized>(
    candidates: Vec<CommitCandidate>,
    source_key: &SourceKey,
    port: &P,
    chunk_size: usize,
    progress: &Progress,
) -> DedupOutcome {
    if candidates.is_empty() {
        return DedupOutcome::default();
    }

    let chunk_size = match port.max_ids_per_query() {
        Some(max) => chunk_size.min(max),
        None => chunk_size,
    }
    .max(1);

    let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
    let chunks: Vec<&[String]> = ids.chunks(chunk_size).collect();
    let total = chunks.len();
    debug!(
        "Checking {} candidates for {} in {} chunks of {}",
        ids.len(),
        source_key,
        total,
        chunk_size
    );

    let results: Vec<Option<HashSet<String>>> = chunks
        .par_iter()
        .enumerate()
        .map(|(i, chunk)| match port.exists_any(source_key.as_str(), chunk) {
            Ok(found) => {
                // Ignore anything the port returns outside this chunk.
                let existing: HashSet<String> = chunk
                    .iter()
                    .filter(|id| found.contains(*id))
                    .cloned()
                    .collect();
                progress.emit(ProgressEvent::ExistenceChunkChecked {
                    chunk: i + 1,
                    chunks: total,
                    existing: existing.len(),
                });
                Some(existing)
            }
            Err(e) => {
                let err = GhiError::ExistenceQueryFailed {
                    source_key: source_key.to_string(),
                    reason: from_db_error(e).to_string(),
                };
                warn!("Chunk {}/{} failed open: {}", i + 1, total, err);
                progress.emit(ProgressEvent::ExistenceChunkFailedOpen {
                    chunk: i + 1,
                    reason: err.to_string(),
                });
                None
            }
        })
        .collect();

    let failed_chunks = results.iter().filter(|r| r.is_none()).count();
    let existing_set: HashSet<String> = results.into_iter().flatten().flatten().collect();

    let before = candidates.len();
    let new: Vec<CommitCandidate> = candidates
        .into_iter()
        .filter(|c| !existing_set.contains(&c.id))
        .collect();

    DedupOutcome {
        existing: before - new.len(),
        new,
        failed_chunks,
    }
}

// ============================================================================
// Tests
// ============================================================================
