//! Remote-source clone cache.
//!
//! [`RemoteSourceCache`] keeps working copies of external repositories under
//! `<cacheRoot>/repos/<sourceKey>/`, tracks them in a durable record, expires
//! them after a TTL, and deepens their history on demand.
//!
//! ## Resolve flow
//!
//! ```text
//! resolve(source, depth, commit?)
//!   ├─ live entry ── refresh (fetch + reset) ── deepen? ── ensure commit ── hit
//!   │        └─ any failure ──────────────┐
//!   ├─ expired entry ── forced removal ───┤
//!   └─ miss ──────────────────────────────┤
//!                                         ├─ orphan dir? ── adopt ── hit
//!                                         │        └─ fails ── forced removal
//!                                         └─ clone fresh
//! ```
//!
//! Calls for the same source key are serialized by a per-key lock; different
//! keys proceed in parallel. The store lock is never held across git calls.

mod removal;
mod store;

pub use removal::{
    ClearReadOnly, EmptyMirror, PlainDelete, PlatformForceRemove, RemovalLadder, RemovalOutcome,
    RemovalStrategy, RenameThenDelete, RetryPolicy,
};
pub use store::{CacheEntry, CacheStore};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use ghi_utils::{canonicalize_locator, SourceKey, SOURCE_KEY_LEN};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::constants::ORIGIN_REMOTE;
use crate::errors::GhiError;
use crate::git::{GitAccess, GitError};
use crate::progress::{Progress, ProgressCallback, ProgressEvent};

/// Source of "now" for expiry decisions.
pub type TimeProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

// ============================================================================
// CacheInfo
// ============================================================================

/// Diagnostic snapshot of the cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub cache_root: PathBuf,
    pub record_path: PathBuf,
    pub ttl_secs: u64,
    pub entries: Vec<CacheEntryInfo>,
}

/// One entry of [`CacheInfo`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryInfo {
    pub source_identifier: String,
    pub source_key: SourceKey,
    pub local_path: PathBuf,
    pub age_secs: i64,
    pub is_expired: bool,
    pub clone_depth: Option<u32>,
}

// ============================================================================
// RemoteSourceCache
// ============================================================================

/// Clone cache for remote sources.
pub struct RemoteSourceCache<G: GitAccess> {
    config: CacheConfig,
    git: G,
    store: RwLock<CacheStore>,
    key_locks: Mutex<HashMap<SourceKey, Arc<Mutex<()>>>>,
    ladder: RemovalLadder,
    progress: Progress,
    now: TimeProvider,
}

impl<G: GitAccess> std::fmt::Debug for RemoteSourceCache<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSourceCache")
            .field("root", &self.root())
            .field("ttl_secs", &self.config.ttl_secs)
            .field("ladder", &self.ladder)
            .finish()
    }
}

impl<G: GitAccess> RemoteSourceCache<G> {
    /// Open the cache: load the durable record and drop unusable entries.
    ///
    /// # Errors
    ///
    /// Returns [`GhiError::InvalidConfiguration`] for an invalid config and
    /// [`GhiError::CacheStoreIo`] if the cache root cannot be created.
    pub fn open(config: CacheConfig, git: G) -> Result<Self, GhiError> {
        for warning in config.validate()? {
            warn!("Config warning: {}", warning);
        }

        let root = config.resolve_cache_root();
        let repos = root.join(crate::constants::REPOS_DIR);
        fs::create_dir_all(&repos).map_err(|e| GhiError::CacheStoreIo {
            path: repos.clone(),
            message: format!("Failed to create cache directory: {}", e),
        })?;

        let (store, repaired) = CacheStore::load(&root);
        info!(
            "Opened clone cache at {:?} with {} entries",
            root,
            store.len()
        );

        let ladder = RemovalLadder::standard(&config.removal);
        let cache = Self {
            config,
            git,
            store: RwLock::new(store),
            key_locks: Mutex::new(HashMap::new()),
            ladder,
            progress: Progress::none(),
            now: Arc::new(Utc::now),
        };

        let dropped = cache.validate_entries();
        if repaired && dropped == 0 {
            cache.persist(&cache.store_read());
        }

        Ok(cache)
    }

    /// Attach a progress callback.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Progress::new(callback);
        self.ladder = self.ladder.with_progress(self.progress.clone());
        self
    }

    /// Replace the forced-removal ladder.
    pub fn with_removal_ladder(mut self, ladder: RemovalLadder) -> Self {
        self.ladder = ladder.with_progress(self.progress.clone());
        self
    }

    /// Replace the clock used for expiry.
    pub fn with_time_provider(mut self, now: TimeProvider) -> Self {
        self.now = now;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn git(&self) -> &G {
        &self.git
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn root(&self) -> PathBuf {
        self.store_read().root().to_path_buf()
    }

    /// Canonical key of a source locator.
    pub fn source_key(&self, source: &str) -> Result<SourceKey, GhiError> {
        Ok(canonicalize_locator(source)?.key())
    }

    // ------------------------------------------------------------------------
    // Resolve
    // ------------------------------------------------------------------------

    /// Return a working copy of `source` with at least `desired_depth` history.
    ///
    /// `desired_depth` of `None` uses the configured default; `Some(0)` asks
    /// for full history. When `required_commit` is given and missing, the copy
    /// is deepened (bounded re-fetch, then full unshallow) before returning.
    ///
    /// # Errors
    ///
    /// Surfaces [`GhiError::CloneFailed`], [`GhiError::PathTooLong`] and
    /// [`GhiError::RemovalFailed`]. Refresh and adoption failures are
    /// recovered by re-cloning.
    pub fn resolve(
        &self,
        source: &str,
        desired_depth: Option<u32>,
        required_commit: Option<&str>,
    ) -> Result<PathBuf, GhiError> {
        let key = self.source_key(source)?;
        let lock = self.key_lock(&key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let depth = self.config.effective_depth(desired_depth);
        self.resolve_locked(source, &key, depth, required_commit)
    }

    /// Deepen the working copy of `source` to at least `at_least` commits,
    /// or to full history if it is already that deep.
    pub fn deepen(&self, source: &str, at_least: u32) -> Result<PathBuf, GhiError> {
        let key = self.source_key(source)?;
        let lock = self.key_lock(&key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let target = at_least.max(self.config.deepen_depth);
        let recorded = self.store_read().get(&key).map(|e| e.clone_depth);
        let depth = match recorded {
            Some(Some(have)) if have >= target => None,
            _ => Some(target),
        };
        debug!("Deepening {} to {:?}", source, depth);
        self.resolve_locked(source, &key, depth, None)
    }

    fn resolve_locked(
        &self,
        source: &str,
        key: &SourceKey,
        depth: Option<u32>,
        required_commit: Option<&str>,
    ) -> Result<PathBuf, GhiError> {
        let now = (self.now)();
        let existing = self.store_read().get(key).cloned();

        if let Some(entry) = existing {
            if entry.is_expired(now, self.config.ttl()) {
                info!(
                    "Cache entry for {} expired (age {}s), invalidating",
                    source,
                    entry.age(now).num_seconds()
                );
                self.evict(key, &entry.local_path, "expired")?;
            } else if entry.local_path.exists() {
                match self.refresh(entry.clone(), depth, required_commit) {
                    Ok(path) => return Ok(path),
                    Err(e) => {
                        warn!("Cached copy of {} is unusable, re-cloning: {}", source, e);
                        self.evict(key, &entry.local_path, &e.to_string())?;
                    }
                }
            } else {
                warn!(
                    "Cached copy of {} is missing at {:?}, re-cloning",
                    source, entry.local_path
                );
                self.drop_entry(key, "missing working copy");
            }
        }

        let target = self.store_read().working_copy_path(key);
        if target.exists() {
            match self.adopt(source, key, &target, depth, required_commit) {
                Ok(path) => return Ok(path),
                Err(e) => {
                    warn!("Cannot adopt orphan {:?}, removing: {}", target, e);
                    self.ladder.remove(&target)?;
                }
            }
        }

        self.clone_fresh(source, key, &target, depth, required_commit)
    }

    /// Bring a live entry current and deep enough.
    fn refresh(
        &self,
        mut entry: CacheEntry,
        depth: Option<u32>,
        required_commit: Option<&str>,
    ) -> Result<PathBuf, GhiError> {
        let path = entry.local_path.clone();
        if !self.git.is_repository(&path) {
            return Err(GhiError::ValidationFailed {
                path,
                reason: "not a git working copy".to_string(),
            });
        }

        self.progress.emit(ProgressEvent::FetchStarted {
            path: path.clone(),
            depth: entry.clone_depth,
        });
        self.git.fetch(&path).map_err(|e| git_command("fetch", e))?;
        self.git
            .reset_hard_to_remote_head(&path)
            .map_err(|e| git_command("reset", e))?;

        if !entry.covers_depth(depth) {
            entry.clone_depth = self.deepen_to(&path, depth)?;
        }

        if let Some(commit) = required_commit {
            entry.clone_depth = self.ensure_commit(&path, commit, entry.clone_depth)?;
        }

        entry.touch((self.now)());
        self.put_entry(entry);

        info!("Cache hit for {:?}", path);
        self.progress.emit(ProgressEvent::CacheHit { path: path.clone() });
        Ok(path)
    }

    /// Take over a directory left behind by an interrupted run.
    fn adopt(
        &self,
        source: &str,
        key: &SourceKey,
        target: &Path,
        depth: Option<u32>,
        required_commit: Option<&str>,
    ) -> Result<PathBuf, GhiError> {
        if !self.git.is_repository(target) {
            return Err(GhiError::ValidationFailed {
                path: target.to_path_buf(),
                reason: "not a git working copy".to_string(),
            });
        }

        let remote = self
            .git
            .remote_url(target, ORIGIN_REMOTE)
            .map_err(|e| git_command("config", e))?
            .ok_or_else(|| GhiError::ValidationFailed {
                path: target.to_path_buf(),
                reason: format!("no `{}` remote", ORIGIN_REMOTE),
            })?;

        let remote_key = canonicalize_locator(&remote).map(|c| c.key()).ok();
        if remote_key.as_ref() != Some(key) {
            return Err(GhiError::ValidationFailed {
                path: target.to_path_buf(),
                reason: format!("`{}` points at {}", ORIGIN_REMOTE, remote),
            });
        }

        // The depth of an adopted copy is unknown; assume the shallowest.
        let shallow = self
            .git
            .is_shallow(target)
            .map_err(|e| git_command("rev-parse", e))?;
        let clone_depth = if shallow { Some(1) } else { None };

        info!("Adopting orphan working copy {:?} for {}", target, source);
        let entry = CacheEntry::new(key.clone(), source, target, clone_depth, (self.now)());
        self.refresh(entry, depth, required_commit)
    }

    fn clone_fresh(
        &self,
        source: &str,
        key: &SourceKey,
        target: &Path,
        depth: Option<u32>,
        required_commit: Option<&str>,
    ) -> Result<PathBuf, GhiError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        info!("Cloning {} into {:?} (depth {:?})", source, target, depth);
        self.progress.emit(ProgressEvent::CloneStarted {
            url: source.to_string(),
            depth,
        });
        let started = Instant::now();

        if let Err(e) = self.git.clone_at(source, target, depth) {
            if let Err(cleanup) = self.ladder.remove(target) {
                error!("Failed to clean up partial clone {:?}: {}", target, cleanup);
            }
            return Err(match e {
                GitError::PathTooLong { .. } => GhiError::path_too_long(source),
                other => GhiError::CloneFailed {
                    url: source.to_string(),
                    reason: other.to_string(),
                },
            });
        }

        self.progress.emit(ProgressEvent::CloneFinished {
            url: source.to_string(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });

        let mut clone_depth = depth;
        if let Some(commit) = required_commit {
            match self.ensure_commit(target, commit, clone_depth) {
                Ok(recorded) => clone_depth = recorded,
                Err(e) => warn!("Could not deepen fresh clone of {}: {}", source, e),
            }
        }

        let entry = CacheEntry::new(key.clone(), source, target, clone_depth, (self.now)());
        self.put_entry(entry);
        Ok(target.to_path_buf())
    }

    /// Fetch to `depth` (`None` = full). Returns the new recorded depth.
    fn deepen_to(&self, path: &Path, depth: Option<u32>) -> Result<Option<u32>, GhiError> {
        self.progress.emit(ProgressEvent::FetchStarted {
            path: path.to_path_buf(),
            depth,
        });
        match depth {
            Some(depth) => {
                self.git
                    .fetch_at(path, depth)
                    .map_err(|e| git_command("fetch", e))?;
                self.progress.emit(ProgressEvent::Deepened {
                    path: path.to_path_buf(),
                    depth,
                });
                Ok(Some(depth))
            }
            None => {
                self.git
                    .fetch_unshallow(path)
                    .map_err(|e| git_command("fetch", e))?;
                self.progress.emit(ProgressEvent::Unshallowed {
                    path: path.to_path_buf(),
                });
                Ok(None)
            }
        }
    }

    /// Deepen progressively until `commit` is present.
    ///
    /// A commit still missing after a full unshallow is logged and the copy is
    /// returned as is.
    fn ensure_commit(
        &self,
        path: &Path,
        commit: &str,
        mut recorded: Option<u32>,
    ) -> Result<Option<u32>, GhiError> {
        let exists = |p: &Path| {
            self.git
                .commit_exists(p, commit)
                .map_err(|e| git_command("cat-file", e))
        };

        if exists(path)? {
            return Ok(recorded);
        }

        let bounded = self.config.deepen_depth;
        if recorded.is_some_and(|have| have < bounded) {
            debug!("Commit {} not in {:?}, fetching depth {}", commit, path, bounded);
            recorded = self.deepen_to(path, Some(bounded))?;
            if exists(path)? {
                return Ok(recorded);
            }
        }

        let shallow = recorded.is_some()
            || self
                .git
                .is_shallow(path)
                .map_err(|e| git_command("rev-parse", e))?;
        if shallow {
            debug!("Commit {} still missing in {:?}, unshallowing", commit, path);
            recorded = self.deepen_to(path, None)?;
            if exists(path)? {
                return Ok(recorded);
            }
        }

        warn!(
            "Commit {} not found in {:?} even with full history",
            commit, path
        );
        Ok(recorded)
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Drop entries that are expired, missing, or not working copies.
    ///
    /// Runs at open. Removal failures are logged; the entry is dropped anyway.
    /// Returns the number of entries dropped.
    pub fn validate_entries(&self) -> usize {
        let now = (self.now)();
        let entries: Vec<CacheEntry> = self.store_read().entries().cloned().collect();
        let mut dropped = Vec::new();

        for entry in entries {
            let reason = if entry.is_expired(now, self.config.ttl()) {
                Some("expired")
            } else if !entry.local_path.exists() {
                Some("missing working copy")
            } else if !self.git.is_repository(&entry.local_path) {
                Some("not a git working copy")
            } else {
                None
            };

            let Some(reason) = reason else { continue };
            debug!("Dropping cache entry {} ({})", entry.source_key, reason);
            if entry.local_path.exists() {
                if let Err(e) = self.ladder.remove(&entry.local_path) {
                    error!("{}", e);
                }
            }
            self.progress.emit(ProgressEvent::CacheInvalidated {
                source_key: entry.source_key.to_string(),
                reason: reason.to_string(),
            });
            dropped.push(entry.source_key);
        }

        if !dropped.is_empty() {
            let mut store = self.store_write();
            for key in &dropped {
                store.remove(key);
            }
            self.persist(&store);
            info!("Dropped {} unusable cache entries", dropped.len());
        }

        dropped.len()
    }

    /// Remove the working copy and entry for `source`.
    ///
    /// Returns whether an entry existed. An orphan directory at the target
    /// path is removed as well.
    ///
    /// # Errors
    ///
    /// [`GhiError::RemovalFailed`] if the directory resisted every strategy.
    /// The entry is gone from the durable record regardless.
    pub fn invalidate(&self, source: &str) -> Result<bool, GhiError> {
        let key = self.source_key(source)?;
        let lock = self.key_lock(&key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (entry, target) = {
            let store = self.store_read();
            (store.get(&key).cloned(), store.working_copy_path(&key))
        };

        match entry {
            Some(entry) => {
                self.evict(&key, &entry.local_path, "invalidated")?;
                Ok(true)
            }
            None => {
                self.ladder.remove(&target)?;
                Ok(false)
            }
        }
    }

    /// Invalidate every entry, then sweep untracked directories under `repos/`.
    ///
    /// Returns the paths that could not be removed.
    pub fn clear_all(&self) -> Vec<PathBuf> {
        let mut failed = Vec::new();
        let keys = self.store_read().keys();

        for key in keys {
            let lock = self.key_lock(&key);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = self.store_read().get(&key).cloned() else {
                continue;
            };
            if let Err(e) = self.evict(&key, &entry.local_path, "cleared") {
                warn!("{}", e);
                failed.push(entry.local_path);
            }
        }

        let repos = self.store_read().repos_dir();
        if let Ok(dir) = fs::read_dir(&repos) {
            for child in dir.flatten() {
                let path = child.path();
                if failed.contains(&path) {
                    continue;
                }
                let removed = match key_from_dir_name(&child.file_name().to_string_lossy()) {
                    Some(key) if path.is_dir() => self.sweep_keyed(&key, &path),
                    _ if path.is_dir() => self.ladder.remove(&path).map(|_| ()),
                    _ => fs::remove_file(&path).map_err(GhiError::from),
                };
                if let Err(e) = removed {
                    warn!("Could not remove {:?}: {}", path, e);
                    failed.push(path);
                }
            }
        }

        info!(
            "Cleared clone cache at {:?} ({} paths left)",
            repos,
            failed.len()
        );
        failed
    }

    /// Diagnostic snapshot.
    pub fn cache_info(&self) -> CacheInfo {
        let now = (self.now)();
        let ttl = self.config.ttl();
        let store = self.store_read();

        let mut entries: Vec<CacheEntryInfo> = store
            .entries()
            .map(|e| CacheEntryInfo {
                source_identifier: e.source_identifier.clone(),
                source_key: e.source_key.clone(),
                local_path: e.local_path.clone(),
                age_secs: e.age(now).num_seconds(),
                is_expired: e.is_expired(now, ttl),
                clone_depth: e.clone_depth,
            })
            .collect();
        entries.sort_by(|a, b| a.source_key.cmp(&b.source_key));

        CacheInfo {
            cache_root: store.root().to_path_buf(),
            record_path: store.record_path(),
            ttl_secs: self.config.ttl_secs,
            entries,
        }
    }

    /// Read-only lookup. Unparsable locators have no entry.
    pub fn entry(&self, source: &str) -> Option<CacheEntry> {
        let key = self.source_key(source).ok()?;
        self.store_read().get(&key).cloned()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn key_lock(&self, key: &SourceKey) -> Arc<Mutex<()>> {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    fn store_read(&self) -> RwLockReadGuard<'_, CacheStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_write(&self) -> RwLockWriteGuard<'_, CacheStore> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, store: &CacheStore) {
        if let Err(e) = store.persist() {
            error!("Failed to persist cache record: {}", e);
        }
    }

    fn put_entry(&self, entry: CacheEntry) {
        let mut store = self.store_write();
        store.insert(entry);
        self.persist(&store);
    }

    fn drop_entry(&self, key: &SourceKey, reason: &str) {
        {
            let mut store = self.store_write();
            store.remove(key);
            self.persist(&store);
        }
        self.progress.emit(ProgressEvent::CacheInvalidated {
            source_key: key.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Remove a working-copy directory under its key lock. A resolve that
    /// raced the sweep has finished by then and is evicted like any entry.
    fn sweep_keyed(&self, key: &SourceKey, path: &Path) -> Result<(), GhiError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = self.store_read().get(key).cloned();
        match entry {
            Some(entry) => self.evict(key, &entry.local_path, "cleared"),
            None => self.ladder.remove(path).map(|_| ()),
        }
    }

    /// Force-remove the directory, then drop the entry even if removal failed.
    fn evict(&self, key: &SourceKey, path: &Path, reason: &str) -> Result<(), GhiError> {
        let removal = self.ladder.remove(path);
        self.drop_entry(key, reason);
        removal.map(|_| ())
    }
}

/// Working-copy directories are named by their source key.
fn key_from_dir_name(name: &str) -> Option<SourceKey> {
    let is_key = name.len() == SOURCE_KEY_LEN && name.chars().all(|c| c.is_ascii_hexdigit());
    is_key.then(|| SourceKey::new(name))
}

fn git_command(command: &str, err: GitError) -> GhiError {
    GhiError::GitCommand {
        command: command.to_string(),
        reason: err.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitResult;
    use crate::types::{CommitCandidate, CommitQuery};
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    const URL: &str = "https://github.com/example/repo.git";
    const MARKER: &str = ".fakegit";

    /// Working copies are plain directories holding `<origin>\n<depth>`.
    /// Depth 0 means full history. `history` is newest first.
    #[derive(Default)]
    struct FakeGit {
        history: Vec<String>,
        calls: Mutex<Vec<String>>,
        fail_clone: AtomicBool,
        fail_fetch: AtomicBool,
        gate: Option<CloneGate>,
    }

    /// Holds every clone open until `peak` concurrent clones are in flight
    /// or `hold` elapses.
    struct CloneGate {
        active: AtomicUsize,
        peak: AtomicUsize,
        until_peak: usize,
        hold: StdDuration,
    }

    impl CloneGate {
        fn new(until_peak: usize, hold: StdDuration) -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                until_peak,
                hold,
            }
        }

        fn pass(&self) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let deadline = Instant::now() + self.hold;
            while Instant::now() < deadline && self.peak.load(Ordering::SeqCst) < self.until_peak {
                thread::sleep(StdDuration::from_millis(5));
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        fn wait_for_clone(&self) {
            let deadline = Instant::now() + StdDuration::from_secs(5);
            while self.active.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
                thread::sleep(StdDuration::from_millis(1));
            }
        }
    }

    impl FakeGit {
        fn with_history(len: usize) -> Self {
            Self {
                history: (0..len).map(|i| format!("c{}", i)).collect(),
                ..Default::default()
            }
        }

        fn gated(gate: CloneGate) -> Self {
            Self {
                gate: Some(gate),
                ..Self::with_history(5)
            }
        }

        fn gate(&self) -> &CloneGate {
            self.gate.as_ref().unwrap()
        }

        fn clone_count(&self) -> usize {
            self.calls().iter().filter(|c| *c == "clone").count()
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn marker(path: &Path) -> Option<(String, u32)> {
            let raw = fs::read_to_string(path.join(MARKER)).ok()?;
            let (origin, depth) = raw.split_once('\n')?;
            Some((origin.to_string(), depth.trim().parse().ok()?))
        }

        fn set_depth(path: &Path, depth: u32) -> GitResult<()> {
            let (origin, _) = Self::marker(path).ok_or_else(|| GitError::Parse {
                message: "not a repository".to_string(),
            })?;
            write_marker(path, &origin, depth);
            Ok(())
        }
    }

    fn write_marker(path: &Path, origin: &str, depth: u32) {
        fs::create_dir_all(path).unwrap();
        fs::write(path.join(MARKER), format!("{}\n{}", origin, depth)).unwrap();
    }

    impl GitAccess for FakeGit {
        fn clone_at(&self, url: &str, dest: &Path, depth: Option<u32>) -> GitResult<()> {
            self.record("clone");
            if self.fail_clone.load(Ordering::SeqCst) {
                fs::create_dir_all(dest.join("partial")).unwrap();
                return Err(GitError::PathTooLong {
                    stderr: "error: unable to create file a/b/c: Filename too long".to_string(),
                });
            }
            write_marker(dest, url, depth.unwrap_or(0));
            if let Some(gate) = &self.gate {
                gate.pass();
            }
            Ok(())
        }

        fn fetch(&self, _path: &Path) -> GitResult<()> {
            self.record("fetch");
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(GitError::Command {
                    command: "fetch".to_string(),
                    code: 128,
                    stderr: "fatal: could not read from remote repository".to_string(),
                });
            }
            Ok(())
        }

        fn fetch_at(&self, path: &Path, depth: u32) -> GitResult<()> {
            self.record(format!("fetch_at:{}", depth));
            Self::set_depth(path, depth)
        }

        fn fetch_unshallow(&self, path: &Path) -> GitResult<()> {
            self.record("unshallow");
            Self::set_depth(path, 0)
        }

        fn reset_hard_to_remote_head(&self, _path: &Path) -> GitResult<()> {
            self.record("reset");
            Ok(())
        }

        fn commit_exists(&self, path: &Path, id: &str) -> GitResult<bool> {
            let depth = Self::marker(path).map(|(_, d)| d).unwrap_or(0);
            Ok(match self.history.iter().position(|c| c == id) {
                Some(i) => depth == 0 || i < depth as usize,
                None => false,
            })
        }

        fn list_commits(&self, _path: &Path, _query: &CommitQuery) -> GitResult<Vec<CommitCandidate>> {
            Ok(Vec::new())
        }

        fn is_repository(&self, path: &Path) -> bool {
            Self::marker(path).is_some()
        }

        fn is_shallow(&self, path: &Path) -> GitResult<bool> {
            Ok(Self::marker(path).is_some_and(|(_, d)| d != 0))
        }

        fn remote_url(&self, path: &Path, _remote: &str) -> GitResult<Option<String>> {
            Ok(Self::marker(path).map(|(origin, _)| origin))
        }
    }

    struct Fixture {
        temp: TempDir,
        git: Arc<FakeGit>,
        clock: Arc<Mutex<DateTime<Utc>>>,
    }

    impl Fixture {
        fn new(git: FakeGit) -> Self {
            Self {
                temp: TempDir::new().unwrap(),
                git: Arc::new(git),
                clock: Arc::new(Mutex::new(Utc::now())),
            }
        }

        fn config(&self) -> CacheConfig {
            let mut config = CacheConfig::with_root(self.temp.path());
            config.removal.retry_delay_ms = 0;
            config
        }

        fn open(&self) -> RemoteSourceCache<Arc<FakeGit>> {
            let clock = Arc::clone(&self.clock);
            RemoteSourceCache::open(self.config(), Arc::clone(&self.git))
                .unwrap()
                .with_time_provider(Arc::new(move || *clock.lock().unwrap()))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.clock.lock().unwrap();
            *now += by;
        }

        fn repos(&self) -> PathBuf {
            self.temp.path().join("repos")
        }
    }

    fn key_of(source: &str) -> SourceKey {
        canonicalize_locator(source).unwrap().key()
    }

    #[test]
    fn test_fresh_clone_then_hit() {
        let fx = Fixture::new(FakeGit::default());
        let cache = fx.open();

        let path = cache.resolve(URL, None, None).unwrap();
        assert_eq!(path, fx.repos().join(key_of(URL).as_str()));
        assert_eq!(cache.entry(URL).unwrap().clone_depth, Some(50));

        let again = cache
            .resolve("https://GitHub.com/example/repo", None, None)
            .unwrap();
        assert_eq!(again, path);
        assert_eq!(fx.git.calls(), vec!["clone", "fetch", "reset"]);
    }

    #[test]
    fn test_entry_survives_reopen() {
        let fx = Fixture::new(FakeGit::default());
        let path = fx.open().resolve(URL, None, None).unwrap();

        let reopened = fx.open();
        let entry = reopened.entry(URL).unwrap();
        assert_eq!(entry.local_path, path);
        assert_eq!(entry.source_identifier, URL);
    }

    #[test]
    fn test_expired_entry_is_recloned() {
        let fx = Fixture::new(FakeGit::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let cache = fx
            .open()
            .with_progress(Arc::new(move |e: &ProgressEvent| sink.lock().unwrap().push(e.clone())));

        cache.resolve(URL, None, None).unwrap();
        let first = cache.entry(URL).unwrap().created_at;

        fx.advance(Duration::days(1) + Duration::seconds(1));
        cache.resolve(URL, None, None).unwrap();

        assert_eq!(fx.git.calls(), vec!["clone", "clone"]);
        assert!(cache.entry(URL).unwrap().created_at > first);
        assert!(events.lock().unwrap().iter().any(|e| matches!(
            e,
            ProgressEvent::CacheInvalidated { reason, .. } if reason == "expired"
        )));
    }

    #[test]
    fn test_entry_at_exact_ttl_is_still_live() {
        let fx = Fixture::new(FakeGit::default());
        let cache = fx.open();
        cache.resolve(URL, None, None).unwrap();

        fx.advance(Duration::days(1));
        cache.resolve(URL, None, None).unwrap();
        assert_eq!(fx.git.calls(), vec!["clone", "fetch", "reset"]);
    }

    #[test]
    fn test_larger_depth_deepens_in_place() {
        let fx = Fixture::new(FakeGit::default());
        let cache = fx.open();
        cache.resolve(URL, Some(10), None).unwrap();
        cache.resolve(URL, Some(200), None).unwrap();

        assert_eq!(fx.git.calls(), vec!["clone", "fetch", "reset", "fetch_at:200"]);
        assert_eq!(cache.entry(URL).unwrap().clone_depth, Some(200));
    }

    #[test]
    fn test_zero_depth_unshallows() {
        let fx = Fixture::new(FakeGit::default());
        let cache = fx.open();
        cache.resolve(URL, None, None).unwrap();
        cache.resolve(URL, Some(0), None).unwrap();

        assert_eq!(fx.git.calls(), vec!["clone", "fetch", "reset", "unshallow"]);
        assert_eq!(cache.entry(URL).unwrap().clone_depth, None);
    }

    #[test]
    fn test_required_commit_within_bounded_deepen() {
        let fx = Fixture::new(FakeGit::with_history(3000));
        let cache = fx.open();
        cache.resolve(URL, None, Some("c500")).unwrap();

        assert_eq!(fx.git.calls(), vec!["clone", "fetch_at:1000"]);
        assert_eq!(cache.entry(URL).unwrap().clone_depth, Some(1000));
    }

    #[test]
    fn test_required_commit_needs_full_history() {
        let fx = Fixture::new(FakeGit::with_history(3000));
        let cache = fx.open();
        cache.resolve(URL, None, Some("c1500")).unwrap();

        assert_eq!(fx.git.calls(), vec!["clone", "fetch_at:1000", "unshallow"]);
        assert_eq!(cache.entry(URL).unwrap().clone_depth, None);
    }

    #[test]
    fn test_missing_commit_is_not_fatal() {
        let fx = Fixture::new(FakeGit::with_history(10));
        let cache = fx.open();
        let path = cache.resolve(URL, None, Some("nope")).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_refresh_failure_falls_back_to_reclone() {
        let fx = Fixture::new(FakeGit::default());
        let cache = fx.open();
        cache.resolve(URL, None, None).unwrap();

        fx.git.fail_fetch.store(true, Ordering::SeqCst);
        let path = cache.resolve(URL, None, None).unwrap();

        assert!(path.join(MARKER).exists());
        assert_eq!(fx.git.calls(), vec!["clone", "fetch", "clone"]);
    }

    #[test]
    fn test_orphan_with_matching_origin_is_adopted() {
        let fx = Fixture::new(FakeGit::default());
        let target = fx.repos().join(key_of(URL).as_str());
        write_marker(&target, "git@github.com:example/repo.git", 0);

        let cache = fx.open();
        let path = cache.resolve(URL, None, None).unwrap();

        assert_eq!(path, target);
        assert_eq!(fx.git.calls(), vec!["fetch", "reset"]);
        assert_eq!(cache.entry(URL).unwrap().clone_depth, None);
    }

    #[test]
    fn test_orphan_with_foreign_origin_is_replaced() {
        let fx = Fixture::new(FakeGit::default());
        let target = fx.repos().join(key_of(URL).as_str());
        write_marker(&target, "https://github.com/someone/else", 0);
        fs::write(target.join("stale.txt"), "x").unwrap();

        let cache = fx.open();
        cache.resolve(URL, None, None).unwrap();

        assert_eq!(fx.git.calls(), vec!["clone"]);
        assert!(!target.join("stale.txt").exists());
        assert_eq!(FakeGit::marker(&target).unwrap().0, URL);
    }

    #[test]
    fn test_path_too_long_cleans_up() {
        let fx = Fixture::new(FakeGit::default());
        fx.git.fail_clone.store(true, Ordering::SeqCst);
        let cache = fx.open();

        let err = cache.resolve(URL, None, None).unwrap_err();
        assert!(matches!(err, GhiError::PathTooLong { .. }));
        assert!(err.remediation_hint().is_some());
        assert!(!fx.repos().join(key_of(URL).as_str()).exists());
        assert!(cache.entry(URL).is_none());
    }

    #[test]
    fn test_invalidate() {
        let fx = Fixture::new(FakeGit::default());
        let cache = fx.open();
        let path = cache.resolve(URL, None, None).unwrap();

        assert!(cache.invalidate(URL).unwrap());
        assert!(!path.exists());
        assert!(cache.entry(URL).is_none());
        assert!(!cache.invalidate(URL).unwrap());
    }

    #[test]
    fn test_clear_all_sweeps_untracked_dirs() {
        let fx = Fixture::new(FakeGit::default());
        let cache = fx.open();
        cache.resolve(URL, None, None).unwrap();
        cache.resolve("https://gitlab.com/other/thing", None, None).unwrap();
        fs::create_dir_all(fx.repos().join("stray").join("nested")).unwrap();

        let failed = cache.clear_all();
        assert!(failed.is_empty());
        assert_eq!(fs::read_dir(fx.repos()).unwrap().count(), 0);
        assert!(cache.cache_info().entries.is_empty());
    }

    #[test]
    fn test_clear_all_waits_for_in_flight_clone() {
        let fx = Fixture::new(FakeGit::gated(CloneGate::new(
            usize::MAX,
            StdDuration::from_millis(300),
        )));
        let cache = fx.open();

        let (resolved, failed) = thread::scope(|s| {
            let resolver = s.spawn(|| cache.resolve(URL, None, None));
            fx.git.gate().wait_for_clone();
            let failed = cache.clear_all();
            (resolver.join().unwrap(), failed)
        });

        let path = resolved.unwrap();
        assert!(failed.is_empty());
        // The sweep ran after the clone finished, so entry and copy went together.
        assert!(cache.entry(URL).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_same_key_resolves_are_serialized() {
        let fx = Fixture::new(FakeGit::gated(CloneGate::new(
            2,
            StdDuration::from_millis(300),
        )));
        let cache = fx.open();

        let (a, b) = thread::scope(|s| {
            let a = s.spawn(|| cache.resolve(URL, None, None));
            let b = s.spawn(|| cache.resolve("git@github.com:example/repo.git", None, None));
            (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
        });

        assert_eq!(a, b);
        assert_eq!(fx.git.clone_count(), 1);
        assert_eq!(fx.git.gate().peak(), 1);
    }

    #[test]
    fn test_different_keys_clone_in_parallel() {
        let fx = Fixture::new(FakeGit::gated(CloneGate::new(
            2,
            StdDuration::from_secs(10),
        )));
        let cache = fx.open();

        let (a, b) = thread::scope(|s| {
            let a = s.spawn(|| cache.resolve(URL, None, None));
            let b = s.spawn(|| cache.resolve("https://gitlab.com/other/thing", None, None));
            (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
        });

        assert_ne!(a, b);
        assert_eq!(fx.git.clone_count(), 2);
        assert_eq!(fx.git.gate().peak(), 2);
    }

    #[test]
    fn test_key_from_dir_name() {
        let key = key_of(URL);
        assert_eq!(key_from_dir_name(key.as_str()), Some(key));
        assert!(key_from_dir_name("stray").is_none());
        assert!(key_from_dir_name("_temp_delete_0123abcd").is_none());
    }

    #[test]
    fn test_open_drops_missing_working_copies() {
        let fx = Fixture::new(FakeGit::default());
        let path = fx.open().resolve(URL, None, None).unwrap();
        fs::remove_dir_all(&path).unwrap();

        let reopened = fx.open();
        assert!(reopened.entry(URL).is_none());
        let (store, _) = CacheStore::load(fx.temp.path());
        assert!(store.is_empty());
    }

    #[test]
    fn test_open_drops_non_repositories() {
        let fx = Fixture::new(FakeGit::default());
        let path = fx.open().resolve(URL, None, None).unwrap();
        fs::remove_file(path.join(MARKER)).unwrap();

        let reopened = fx.open();
        assert!(reopened.entry(URL).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_deepen() {
        let fx = Fixture::new(FakeGit::default());
        let cache = fx.open();
        cache.resolve(URL, None, None).unwrap();

        cache.deepen(URL, 100).unwrap();
        assert_eq!(cache.entry(URL).unwrap().clone_depth, Some(1000));

        cache.deepen(URL, 100).unwrap();
        assert_eq!(cache.entry(URL).unwrap().clone_depth, None);
        assert_eq!(
            fx.git.calls(),
            vec!["clone", "fetch", "reset", "fetch_at:1000", "fetch", "reset", "unshallow"]
        );
    }

    #[test]
    fn test_cache_info() {
        let fx = Fixture::new(FakeGit::default());
        let cache = fx.open();
        cache.resolve(URL, None, None).unwrap();
        fx.advance(Duration::seconds(10));

        let info = cache.cache_info();
        assert_eq!(info.cache_root, fx.temp.path());
        assert_eq!(info.ttl_secs, 86_400);
        assert_eq!(info.entries.len(), 1);
        let entry = &info.entries[0];
        assert_eq!(entry.age_secs, 10);
        assert!(!entry.is_expired);
        assert_eq!(entry.clone_depth, Some(50));
        assert_eq!(entry.source_key, key_of(URL));
    }

    #[test]
    fn test_clone_progress_events() {
        let fx = Fixture::new(FakeGit::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let cache = fx
            .open()
            .with_progress(Arc::new(move |e: &ProgressEvent| sink.lock().unwrap().push(e.clone())));

        cache.resolve(URL, None, None).unwrap();
        let events = events.lock().unwrap();
        assert_eq!(
            events[0],
            ProgressEvent::CloneStarted {
                url: URL.to_string(),
                depth: Some(50)
            }
        );
        assert!(matches!(events[1], ProgressEvent::CloneFinished { .. }));
    }

    #[test]
    fn test_invalid_locator() {
        let fx = Fixture::new(FakeGit::default());
        let cache = fx.open();
        assert!(matches!(
            cache.resolve("", None, None),
            Err(GhiError::Locator(_))
        ));
        assert!(cache.entry("").is_none());
    }
}
