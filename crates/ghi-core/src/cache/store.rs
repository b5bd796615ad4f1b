//! Durable cache record.
//!
//! The record lives at `<cacheRoot>/cache_metadata.json` and maps each
//! [`SourceKey`] to its [`CacheEntry`]. It is rewritten in full after every
//! mutation through a temp file and rename. A missing or unreadable record
//! means a cold cache, never an error.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ghi_utils::SourceKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{CACHE_METADATA_FILENAME, CACHE_RECORD_VERSION, REPOS_DIR};
use crate::errors::GhiError;

// ============================================================================
// CacheEntry
// ============================================================================

/// One cloned working copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub source_key: SourceKey,
    /// The locator as the caller first supplied it.
    pub source_identifier: String,
    /// Always `<cacheRoot>/repos/<sourceKey>`.
    pub local_path: PathBuf,
    /// Governs expiration.
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Last known fetch depth. `None` = full history.
    #[serde(default)]
    pub clone_depth: Option<u32>,
}

impl CacheEntry {
    pub fn new(
        source_key: SourceKey,
        source_identifier: impl Into<String>,
        local_path: impl Into<PathBuf>,
        clone_depth: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source_key,
            source_identifier: source_identifier.into(),
            local_path: local_path.into(),
            created_at: now,
            last_accessed_at: now,
            clone_depth,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }

    /// An entry expires once its age exceeds the TTL.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.age(now) > ttl
    }

    /// Whether the recorded history already reaches `desired` (`None` = full).
    pub fn covers_depth(&self, desired: Option<u32>) -> bool {
        match (self.clone_depth, desired) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(have), Some(want)) => have >= want,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
    }
}

// ============================================================================
// CacheStore
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<SourceKey, CacheEntry>,
}

/// In-memory view of the durable record.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    entries: HashMap<SourceKey, CacheEntry>,
}

impl CacheStore {
    /// An empty store rooted at `root`. Nothing is read or written.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: HashMap::new(),
        }
    }

    /// Load the record under `root`.
    ///
    /// Unreadable or unparsable records are logged and yield an empty store.
    /// Entry paths that do not match the canonical layout are repaired in
    /// memory; call [`persist`](Self::persist) to write the repair back.
    pub fn load(root: impl Into<PathBuf>) -> (Self, bool) {
        let mut store = Self::empty(root);
        let path = store.record_path();

        if !path.exists() {
            debug!("No cache record at {:?}, starting cold", path);
            return (store, false);
        }

        let record = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<CacheRecord>(&content) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Cache record {:?} is corrupted, starting cold: {}", path, e);
                    return (store, false);
                }
            },
            Err(e) => {
                warn!("Cannot read cache record {:?}, starting cold: {}", path, e);
                return (store, false);
            }
        };

        if record.version != CACHE_RECORD_VERSION {
            warn!(
                "Cache record {:?} has version {}, expected {}; starting cold",
                path, record.version, CACHE_RECORD_VERSION
            );
            return (store, false);
        }

        let mut repaired = false;
        for (key, mut entry) in record.entries {
            let canonical = store.working_copy_path(&key);
            if entry.source_key != key || entry.local_path != canonical {
                debug!(
                    "Repairing cache entry {}: {:?} -> {:?}",
                    key, entry.local_path, canonical
                );
                entry.source_key = key.clone();
                entry.local_path = canonical;
                repaired = true;
            }
            store.entries.insert(key, entry);
        }

        debug!("Loaded {} cache entries from {:?}", store.entries.len(), path);
        (store, repaired)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.root.join(REPOS_DIR)
    }

    pub fn record_path(&self) -> PathBuf {
        self.root.join(CACHE_METADATA_FILENAME)
    }

    /// The only directory an entry for `key` may own.
    pub fn working_copy_path(&self, key: &SourceKey) -> PathBuf {
        self.repos_dir().join(key.as_str())
    }

    pub fn get(&self, key: &SourceKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(entry.source_key.clone(), entry)
    }

    pub fn remove(&mut self, key: &SourceKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> Vec<SourceKey> {
        let mut keys: Vec<SourceKey> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the durable record in full.
    pub fn persist(&self) -> Result<(), GhiError> {
        let record_path = self.record_path();
        let temp_path = record_path.with_extension("json.tmp");

        fs::create_dir_all(&self.root).map_err(|e| GhiError::CacheStoreIo {
            path: self.root.clone(),
            message: format!("Failed to create cache root: {}", e),
        })?;

        let record = CacheRecord {
            version: CACHE_RECORD_VERSION,
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let content = serde_json::to_string_pretty(&record)?;

        {
            let mut file = File::create(&temp_path).map_err(|e| GhiError::CacheStoreIo {
                path: temp_path.clone(),
                message: format!("Failed to create temp file: {}", e),
            })?;
            file.write_all(content.as_bytes())
                .and_then(|_| file.flush())
                .map_err(|e| GhiError::CacheStoreIo {
                    path: temp_path.clone(),
                    message: format!("Failed to write temp file: {}", e),
                })?;
        }

        fs::rename(&temp_path, &record_path).map_err(|e| GhiError::CacheStoreIo {
            path: record_path.clone(),
            message: format!("Failed to rename temp file: {}", e),
        })?;

        debug!("Persisted {} cache entries", self.entries.len());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
