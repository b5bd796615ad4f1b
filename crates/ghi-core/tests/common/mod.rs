//! Shared test utilities for ghi-core integration tests.
//!
//! Tests that need a real repository build one locally with the `git` binary
//! and skip themselves when it is not installed.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use ghi_core::{CacheConfig, GitAccess, GitCli, RemoteSourceCache};
use tempfile::TempDir;

/// First commit timestamp (2024-01-01T00:00:00Z).
pub const BASE_TIMESTAMP: i64 = 1_704_067_200;

/// Whether `git` can be spawned. Logs a skip notice when it cannot.
pub fn git_available() -> bool {
    let available = GitCli::new().is_available();
    if !available {
        eprintln!("git not available, skipping");
    }
    available
}

/// Run git in `dir` and return stdout.
///
/// # Panics
///
/// Panics if git fails. Test helper only.
pub fn git(dir: &Path, args: &[&str]) -> String {
    git_at(dir, args, BASE_TIMESTAMP)
}

fn git_at(dir: &Path, args: &[&str], timestamp: i64) -> String {
    let date = format!("{} +0000", timestamp);
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.name=Test Author",
            "-c",
            "user.email=author@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .env("GIT_AUTHOR_DATE", &date)
        .env("GIT_COMMITTER_DATE", &date)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("Failed to spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// A local "remote" repository with a linear history.
pub struct Origin {
    pub dir: PathBuf,
    commits: usize,
}

impl Origin {
    /// Create `<root>/origin` with `commits` commits, `commit 0` being the oldest.
    pub fn create(root: &Path, commits: usize) -> Self {
        let dir = root.join("origin");
        fs::create_dir_all(&dir).expect("Failed to create origin dir");
        git(&dir, &["init", "-q"]);
        let mut origin = Self { dir, commits: 0 };
        for _ in 0..commits {
            origin.commit();
        }
        origin
    }

    /// Add one commit touching one of a handful of files. Returns its id.
    pub fn commit(&mut self) -> String {
        let n = self.commits;
        let file = format!("file{}.txt", n % 4);
        fs::write(self.dir.join(&file), format!("revision {}\n", n)).expect("Failed to write file");
        let ts = BASE_TIMESTAMP + (n as i64) * 3_600;
        git_at(&self.dir, &["add", "-A"], ts);
        git_at(&self.dir, &["commit", "-q", "-m", &format!("commit {}", n)], ts);
        self.commits += 1;
        self.head()
    }

    pub fn head(&self) -> String {
        git(&self.dir, &["rev-parse", "HEAD"]).trim().to_string()
    }

    /// Id of the oldest commit.
    pub fn root_commit(&self) -> String {
        git(&self.dir, &["rev-list", "--max-parents=0", "HEAD"])
            .trim()
            .to_string()
    }

    /// Locator understood by the cache.
    pub fn locator(&self) -> String {
        self.dir.to_string_lossy().into_owned()
    }

    pub fn len(&self) -> usize {
        self.commits
    }
}

/// Cache config rooted inside `temp`, with instant removal retries.
pub fn cache_config(temp: &TempDir) -> CacheConfig {
    let mut config = CacheConfig::with_root(temp.path().join("cache"));
    config.removal.retry_delay_ms = 0;
    config
}

/// Open a cache over the git CLI.
pub fn open_cache(config: CacheConfig) -> RemoteSourceCache<GitCli> {
    RemoteSourceCache::open(config, GitCli::new()).expect("Failed to open cache")
}

/// Number of commits reachable from HEAD in a working copy.
pub fn history_len(path: &Path) -> usize {
    git(path, &["rev-list", "--count", "HEAD"])
        .trim()
        .parse()
        .expect("rev-list --count output")
}

/// Whether a working copy is shallow, via the `GitAccess` seam.
pub fn is_shallow(path: &Path) -> bool {
    GitCli::new().is_shallow(path).expect("is_shallow")
}
