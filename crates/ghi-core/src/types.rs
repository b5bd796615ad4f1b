//! Core domain types shared by extraction, planning, and ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CommitCandidate
// ============================================================================

/// How a file changed in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    TypeChanged,
    Other,
}

impl ChangeKind {
    /// Parse the status letter of `git log --name-status` (`R100` -> `Renamed`).
    pub fn from_status(status: &str) -> Self {
        match status.chars().next() {
            Some('A') => Self::Added,
            Some('M') => Self::Modified,
            Some('D') => Self::Deleted,
            Some('R') => Self::Renamed,
            Some('C') => Self::Copied,
            Some('T') => Self::TypeChanged,
            _ => Self::Other,
        }
    }
}

/// One entry of a commit's changed-file summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedFile {
    pub path: String,
    pub change: ChangeKind,
    /// Source path for renames and copies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
}

/// A commit extracted from a working copy, not yet confirmed as new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitCandidate {
    /// Full commit hash.
    pub id: String,
    pub author: String,
    pub author_email: String,
    /// Author timestamp.
    pub timestamp: DateTime<Utc>,
    /// First line of the commit message.
    pub message_summary: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub changed_files: Vec<ChangedFile>,
}

// ============================================================================
// CommitQuery
// ============================================================================

/// A bounded window of history, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitQuery {
    /// Commits to skip behind the tip.
    pub skip: usize,
    /// Maximum commits to return. `None` = unbounded.
    pub max_count: Option<usize>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl CommitQuery {
    pub fn has_date_bounds(&self) -> bool {
        self.since.is_some() || self.until.is_some()
    }
}

// ============================================================================
// IndexingRequest / IndexingPlan
// ============================================================================

/// An ingestion request for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingRequest {
    /// URL or path of the source.
    pub source_identifier: String,
    /// Desired total or desired additional count, see [`crate::planner::plan`].
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default = "default_dedup_enabled")]
    pub dedup_enabled: bool,
    #[serde(default)]
    pub explicit_offset: usize,
}

fn default_dedup_enabled() -> bool {
    true
}

impl IndexingRequest {
    pub fn new(source_identifier: impl Into<String>) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            limit: None,
            since: None,
            until: None,
            dedup_enabled: true,
            explicit_offset: 0,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_dedup(mut self, enabled: bool) -> Self {
        self.dedup_enabled = enabled;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.explicit_offset = offset;
        self
    }

    pub fn has_date_bounds(&self) -> bool {
        self.since.is_some() || self.until.is_some()
    }
}

/// Resolved fetch work for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingPlan {
    /// Depth the working copy needs. 0 = full history.
    pub fetch_depth: u32,
    pub skip_offset: usize,
    /// Commits to extract after the skip, already capped.
    pub resolved_limit: usize,
    /// Nothing to fetch or upload.
    pub short_circuit: bool,
}

impl IndexingPlan {
    /// Build the extraction window for this plan.
    pub fn query(&self, request: &IndexingRequest) -> CommitQuery {
        CommitQuery {
            skip: self.skip_offset,
            max_count: Some(self.resolved_limit),
            since: request.since,
            until: request.until,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
