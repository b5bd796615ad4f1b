//! Candidate extraction from a cached working copy.
//!
//! A shallow clone may not reach far enough behind the tip for the requested
//! window. That is not an error: extraction deepens the copy once and retries
//! exactly once.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::cache::RemoteSourceCache;
use crate::constants::DEFAULT_EXTRACTION_LIMIT;
use crate::errors::GhiError;
use crate::git::{GitAccess, GitError};
use crate::progress::ProgressEvent;
use crate::types::{CommitCandidate, CommitQuery};

/// Extract commits for `query` from the working copy of `source`.
///
/// `fetch_depth` is the depth to resolve the cache at (0 = full history).
/// Results are ordered most recent first.
///
/// # Errors
///
/// Cache failures ([`GhiError::CloneFailed`], [`GhiError::PathTooLong`],
/// [`GhiError::RemovalFailed`]) propagate. Git failures other than missing
/// shallow history become [`GhiError::GitCommand`].
pub fn extract_candidates<G: GitAccess>(
    cache: &RemoteSourceCache<G>,
    source: &str,
    fetch_depth: u32,
    query: &CommitQuery,
) -> Result<Vec<CommitCandidate>, GhiError> {
    let path = cache.resolve(source, Some(fetch_depth), None)?;
    let git = cache.git();

    match git.list_commits(&path, query) {
        Ok(commits) if !is_truncated(git, &path, query, &commits) => {
            return Ok(finish(cache, commits));
        }
        Ok(commits) => debug!(
            "Got {} of {:?} commits from shallow copy of {}, deepening",
            commits.len(),
            query.max_count,
            source
        ),
        Err(e) if e.is_shallow_signal() => {
            debug!("Shallow history while listing {}: {}", source, e);
        }
        Err(e) => return Err(log_failed(e)),
    }

    let path = cache.deepen(source, required_depth(query))?;

    match git.list_commits(&path, query) {
        Ok(commits) => Ok(finish(cache, commits)),
        Err(e) if e.is_shallow_signal() => {
            warn!(
                "History of {} still unavailable after deepening, returning no candidates: {}",
                source, e
            );
            Ok(finish(cache, Vec::new()))
        }
        Err(e) => Err(log_failed(e)),
    }
}

/// Depth needed to see `skip + max_count` commits behind the tip.
pub fn required_depth(query: &CommitQuery) -> u32 {
    let window = query
        .skip
        .saturating_add(query.max_count.unwrap_or(DEFAULT_EXTRACTION_LIMIT));
    u32::try_from(window).unwrap_or(u32::MAX)
}

/// A short result from a shallow copy may just be the clone boundary.
fn is_truncated<G: GitAccess>(
    git: &G,
    path: &Path,
    query: &CommitQuery,
    commits: &[CommitCandidate],
) -> bool {
    if !short_of_window(query, commits) {
        return false;
    }
    match git.is_shallow(path) {
        Ok(shallow) => shallow,
        Err(e) => {
            debug!("Cannot tell whether {:?} is shallow: {}", path, e);
            false
        }
    }
}

/// Fewer commits than asked for. With a `since` bound that only counts when
/// the oldest commit returned is still newer than `since`.
fn short_of_window(query: &CommitQuery, commits: &[CommitCandidate]) -> bool {
    let Some(max) = query.max_count else {
        return false;
    };
    if commits.len() >= max {
        return false;
    }
    match (query.since, commits.last()) {
        (None, _) => true,
        (Some(since), Some(oldest)) => oldest.timestamp > since,
        (Some(_), None) => false,
    }
}

fn finish<G: GitAccess>(
    cache: &RemoteSourceCache<G>,
    commits: Vec<CommitCandidate>,
) -> Vec<CommitCandidate> {
    info!("Extracted {} candidate commits", commits.len());
    cache.progress().emit(ProgressEvent::CandidatesExtracted {
        count: commits.len(),
    });
    commits
}

fn log_failed(err: GitError) -> GhiError {
    warn!("Commit listing failed: {}", err);
    GhiError::GitCommand {
        command: "log".to_string(),
        reason: err.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn commit_at(id: &str, timestamp: DateTime<Utc>) -> CommitCandidate {
        CommitCandidate {
            id: id.to_string(),
            author: "dev".to_string(),
            author_email: "dev@example.com".to_string(),
            timestamp,
            message_summary: format!("commit {}", id),
            parents: Vec::new(),
            changed_files: Vec::new(),
        }
    }

    #[test]
    fn test_short_result_without_dates_is_short() {
        let query = CommitQuery {
            max_count: Some(10),
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(short_of_window(&query, &[commit_at("a", now)]));
        assert!(!short_of_window(&CommitQuery::default(), &[]));

        let full: Vec<_> = (0..10).map(|i| commit_at(&i.to_string(), now)).collect();
        assert!(!short_of_window(&query, &full));
    }

    #[test]
    fn test_small_date_window_is_not_short() {
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let query = CommitQuery {
            max_count: Some(1000),
            since: Some(since),
            ..Default::default()
        };

        // The window holds three commits and the oldest is right at `since`.
        let window = vec![
            commit_at("c", since + chrono::Duration::hours(3)),
            commit_at("b", since + chrono::Duration::hours(1)),
            commit_at("a", since),
        ];
        assert!(!short_of_window(&query, &window));
        assert!(!short_of_window(&query, &[]));
    }

    #[test]
    fn test_date_window_cut_by_clone_boundary_is_short() {
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let query = CommitQuery {
            max_count: Some(1000),
            since: Some(since),
            ..Default::default()
        };
        let window = vec![
            commit_at("c", since + chrono::Duration::days(3)),
            commit_at("b", since + chrono::Duration::days(2)),
        ];
        assert!(short_of_window(&query, &window));
    }

    #[test]
    fn test_required_depth() {
        let query = CommitQuery {
            skip: 200,
            max_count: Some(800),
            ..Default::default()
        };
        assert_eq!(required_depth(&query), 1000);

        let unbounded = CommitQuery {
            skip: 40,
            ..Default::default()
        };
        assert_eq!(required_depth(&unbounded), 140);

        let huge = CommitQuery {
            skip: usize::MAX,
            max_count: Some(1),
            ..Default::default()
        };
        assert_eq!(required_depth(&huge), u32::MAX);
    }
}
