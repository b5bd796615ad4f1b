//! Configuration types for GHI.
//!
//! - [`GhiConfig`]: User-level configuration stored in `~/.ghi/config.yaml`
//! - [`CacheConfig`]: Clone cache layout, TTL, depth, and dedup limits
//! - [`RemovalConfig`]: Retry parameters for the forced-removal ladder
//!
//! Every field has a default, so an absent file or an empty `cache:` section
//! yields a working configuration.
//!
//! ```yaml
//! cache:
//!   cacheRoot: /var/cache/ghi
//!   ttlSecs: 86400
//!   defaultCloneDepth: 50
//!   existenceChunkSize: 800
//!   maxFetchCount: 1000
//!   removal:
//!     maxAttempts: 3
//!     retryDelayMs: 500
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    CACHE_DIR_ENV, CACHE_METADATA_FILENAME, CONFIG_FILENAME, GHI_HOME_DIR, HOME_CACHE_SUBDIR,
    REPOS_DIR, TEMP_CACHE_DIRNAME,
};
use crate::errors::GhiError;

// ============================================================================
// Defaults
// ============================================================================

/// Default entry lifetime (1 day).
pub const DEFAULT_TTL_SECS: u64 = 86_400;

/// Default shallow clone depth. 0 means full history.
pub const DEFAULT_CLONE_DEPTH: u32 = 50;

/// Bounded re-fetch depth tried before a full unshallow.
pub const DEFAULT_DEEPEN_DEPTH: u32 = 1_000;

/// Depth requested when a request carries a date window.
pub const DEFAULT_DATE_WINDOW_DEPTH: u32 = 1_000;

/// Identifiers per downstream existence query.
pub const DEFAULT_EXISTENCE_CHUNK_SIZE: usize = 800;

/// Global cap on commits fetched for one request.
pub const DEFAULT_MAX_FETCH_COUNT: usize = 1_000;

/// Attempts per removal strategy.
pub const DEFAULT_REMOVAL_MAX_ATTEMPTS: u32 = 3;

/// Pause between attempts of one removal strategy.
pub const DEFAULT_REMOVAL_RETRY_DELAY_MS: u64 = 500;

/// Wall-clock limit for external removal commands.
pub const DEFAULT_REMOVAL_COMMAND_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// GhiConfig
// ============================================================================

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GhiConfig {
    /// Clone cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl GhiConfig {
    /// Load the configuration from the default location (`~/.ghi/config.yaml`).
    ///
    /// If the file does not exist, returns a default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GhiError::InvalidConfiguration`] if the file exists but cannot be
    /// parsed or fails validation.
    pub fn load_default() -> Result<Self, GhiError> {
        match Self::default_path() {
            Some(path) => Self::from_path(&path),
            None => {
                tracing::debug!("Could not determine home directory, using default config");
                Ok(Self::default())
            }
        }
    }

    /// Load the configuration from a specific path.
    ///
    /// If the file does not exist, returns a default configuration.
    pub fn from_path(path: &Path) -> Result<Self, GhiError> {
        if !path.exists() {
            tracing::debug!("Config not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GhiError::InvalidConfiguration {
            message: format!("Failed to read {}: {}", path.display(), e),
            hint: "Check the file permissions".to_string(),
        })?;

        Self::from_yaml(&content).map_err(|e| match e {
            GhiError::Yaml(err) => GhiError::InvalidConfiguration {
                message: format!("Failed to parse {}: {}", path.display(), err),
                hint: "Fix the YAML syntax or remove the file to use defaults".to_string(),
            },
            other => other,
        })
    }

    /// Parse and validate a YAML document, logging warnings.
    pub fn from_yaml(content: &str) -> Result<Self, GhiError> {
        let config: Self = serde_yaml::from_str(content)?;

        let warnings = config.validate()?;
        for warning in warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(config)
    }

    /// Get the default config directory (`~/.ghi`).
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(GHI_HOME_DIR))
    }

    /// Get the default config file path (`~/.ghi/config.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        Self::default_dir().map(|d| d.join(CONFIG_FILENAME))
    }

    /// Validate the configuration, returning warnings.
    pub fn validate(&self) -> Result<Vec<String>, GhiError> {
        self.cache.validate()
    }
}

// ============================================================================
// CacheConfig
// ============================================================================

/// Clone cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Cache root override. See [`CacheConfig::resolve_cache_root`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_root: Option<PathBuf>,

    /// Entry lifetime measured from `createdAt`.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Depth of a fresh clone when the caller does not ask for one. 0 = full.
    #[serde(default = "default_clone_depth")]
    pub default_clone_depth: u32,

    /// Bounded re-fetch depth tried before a full unshallow.
    #[serde(default = "default_deepen_depth")]
    pub deepen_depth: u32,

    /// Depth requested for date-window extraction.
    #[serde(default = "default_date_window_depth")]
    pub date_window_depth: u32,

    /// Identifiers per downstream existence query.
    #[serde(default = "default_existence_chunk_size")]
    pub existence_chunk_size: usize,

    /// Global cap on commits fetched for one request.
    #[serde(default = "default_max_fetch_count")]
    pub max_fetch_count: usize,

    /// Forced removal retry settings.
    #[serde(default)]
    pub removal: RemovalConfig,

    /// Optional wall-clock limit per git invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_timeout_secs: Option<u64>,
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}
fn default_clone_depth() -> u32 {
    DEFAULT_CLONE_DEPTH
}
fn default_deepen_depth() -> u32 {
    DEFAULT_DEEPEN_DEPTH
}
fn default_date_window_depth() -> u32 {
    DEFAULT_DATE_WINDOW_DEPTH
}
fn default_existence_chunk_size() -> usize {
    DEFAULT_EXISTENCE_CHUNK_SIZE
}
fn default_max_fetch_count() -> usize {
    DEFAULT_MAX_FETCH_COUNT
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: None,
            ttl_secs: DEFAULT_TTL_SECS,
            default_clone_depth: DEFAULT_CLONE_DEPTH,
            deepen_depth: DEFAULT_DEEPEN_DEPTH,
            date_window_depth: DEFAULT_DATE_WINDOW_DEPTH,
            existence_chunk_size: DEFAULT_EXISTENCE_CHUNK_SIZE,
            max_fetch_count: DEFAULT_MAX_FETCH_COUNT,
            removal: RemovalConfig::default(),
            git_timeout_secs: None,
        }
    }
}

impl CacheConfig {
    /// A default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Resolve the cache root.
    ///
    /// Order: explicit `cacheRoot`, `GHI_CACHE_DIR`, `~/.cache/ghi`, `<temp>/ghi-cache`.
    pub fn resolve_cache_root(&self) -> PathBuf {
        resolve_cache_root_from(
            self.cache_root.as_deref(),
            std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from),
            dirs::home_dir(),
        )
    }

    /// Directory holding working copies.
    pub fn repos_dir(&self) -> PathBuf {
        self.resolve_cache_root().join(REPOS_DIR)
    }

    /// Path of the durable cache record.
    pub fn record_path(&self) -> PathBuf {
        self.resolve_cache_root().join(CACHE_METADATA_FILENAME)
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.ttl_secs).unwrap_or(i64::MAX))
    }

    /// Depth for a caller's request, falling back to the default. `None` = full history.
    pub fn effective_depth(&self, requested: Option<u32>) -> Option<u32> {
        match requested.unwrap_or(self.default_clone_depth) {
            0 => None,
            depth => Some(depth),
        }
    }

    /// Per-call git timeout.
    pub fn git_timeout(&self) -> Option<Duration> {
        self.git_timeout_secs.map(Duration::from_secs)
    }

    /// Validates the cache configuration, returning warnings for questionable values.
    ///
    /// # Errors
    /// Returns an error if `existenceChunkSize`, `maxFetchCount` or
    /// `removal.maxAttempts` is 0.
    pub fn validate(&self) -> Result<Vec<String>, GhiError> {
        let mut warnings = Vec::new();

        if self.existence_chunk_size == 0 {
            return Err(GhiError::InvalidConfiguration {
                message: "cache.existenceChunkSize cannot be 0".to_string(),
                hint: "Set existenceChunkSize to at least 1 (recommended: 800)".to_string(),
            });
        }

        if self.max_fetch_count == 0 {
            return Err(GhiError::InvalidConfiguration {
                message: "cache.maxFetchCount cannot be 0".to_string(),
                hint: "Set maxFetchCount to at least 1 (default: 1000)".to_string(),
            });
        }

        let removal_warnings = self.removal.validate()?;
        warnings.extend(removal_warnings);

        if self.ttl_secs == 0 {
            warnings.push(
                "cache.ttlSecs=0 expires every entry immediately; each request will re-clone"
                    .to_string(),
            );
        }

        if self.existence_chunk_size > 5_000 {
            warnings.push(format!(
                "cache.existenceChunkSize={} is very large; downstream stores may reject the query expression",
                self.existence_chunk_size
            ));
        }

        if self.default_clone_depth != 0 && self.deepen_depth <= self.default_clone_depth {
            warnings.push(format!(
                "cache.deepenDepth={} does not exceed defaultCloneDepth={}; deepening will go straight to a full unshallow",
                self.deepen_depth, self.default_clone_depth
            ));
        }

        Ok(warnings)
    }
}

fn resolve_cache_root_from(
    explicit: Option<&Path>,
    env: Option<PathBuf>,
    home: Option<PathBuf>,
) -> PathBuf {
    if let Some(root) = explicit {
        return root.to_path_buf();
    }
    if let Some(root) = env.filter(|p| !p.as_os_str().is_empty()) {
        return root;
    }
    match home {
        Some(home) => home.join(HOME_CACHE_SUBDIR),
        None => std::env::temp_dir().join(TEMP_CACHE_DIRNAME),
    }
}

// ============================================================================
// RemovalConfig
// ============================================================================

/// Retry parameters for each rung of the forced-removal ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalConfig {
    /// Attempts per strategy before escalating.
    #[serde(default = "default_removal_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts of one strategy.
    #[serde(default = "default_removal_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Wall-clock limit for external commands (mirror, force-remove).
    #[serde(default = "default_removal_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_removal_max_attempts() -> u32 {
    DEFAULT_REMOVAL_MAX_ATTEMPTS
}
fn default_removal_retry_delay_ms() -> u64 {
    DEFAULT_REMOVAL_RETRY_DELAY_MS
}
fn default_removal_command_timeout_secs() -> u64 {
    DEFAULT_REMOVAL_COMMAND_TIMEOUT_SECS
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_REMOVAL_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_REMOVAL_RETRY_DELAY_MS,
            command_timeout_secs: DEFAULT_REMOVAL_COMMAND_TIMEOUT_SECS,
        }
    }
}

impl RemovalConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn validate(&self) -> Result<Vec<String>, GhiError> {
        let mut warnings = Vec::new();

        if self.max_attempts == 0 {
            return Err(GhiError::InvalidConfiguration {
                message: "cache.removal.maxAttempts cannot be 0".to_string(),
                hint: "Set maxAttempts to at least 1 (default: 3)".to_string(),
            });
        }

        if self.retry_delay_ms > 10_000 {
            warnings.push(format!(
                "cache.removal.retryDelayMs={} is long; a stuck directory can block a request for minutes",
                self.retry_delay_ms
            ));
        }

        Ok(warnings)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl_secs, 86_400);
        assert_eq!(config.default_clone_depth, 50);
        assert_eq!(config.existence_chunk_size, 800);
        assert_eq!(config.max_fetch_count, 1_000);
        assert_eq!(config.removal.max_attempts, 3);
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_empty_yaml_yields_defaults() {
        let config = GhiConfig::from_yaml("{}").unwrap();
        assert_eq!(config.cache.ttl_secs, DEFAULT_TTL_SECS);

        let config = GhiConfig::from_yaml("cache: {}").unwrap();
        assert_eq!(config.cache.deepen_depth, DEFAULT_DEEPEN_DEPTH);
    }

    #[test]
    fn test_camel_case_fields() {
        let yaml = r#"
cache:
  cacheRoot: /srv/ghi
  ttlSecs: 3600
  defaultCloneDepth: 0
  existenceChunkSize: 200
  maxFetchCount: 2000
  removal:
    maxAttempts: 5
    retryDelayMs: 10
  gitTimeoutSecs: 120
"#;
        let config = GhiConfig::from_yaml(yaml).unwrap();
        let cache = config.cache;
        assert_eq!(cache.cache_root, Some(PathBuf::from("/srv/ghi")));
        assert_eq!(cache.ttl_secs, 3600);
        assert_eq!(cache.default_clone_depth, 0);
        assert_eq!(cache.existence_chunk_size, 200);
        assert_eq!(cache.max_fetch_count, 2000);
        assert_eq!(cache.removal.max_attempts, 5);
        assert_eq!(cache.removal.retry_delay_ms, 10);
        assert_eq!(cache.removal.command_timeout_secs, 30);
        assert_eq!(cache.git_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = CacheConfig {
            existence_chunk_size: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GhiError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_zero_removal_attempts_rejected() {
        let err = GhiConfig::from_yaml("cache:\n  removal:\n    maxAttempts: 0\n").unwrap_err();
        assert!(err.to_string().contains("maxAttempts"));
    }

    #[test]
    fn test_zero_max_fetch_rejected() {
        let config = CacheConfig {
            max_fetch_count: 0,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_depth() {
        let config = CacheConfig::default();
        assert_eq!(config.effective_depth(None), Some(50));
        assert_eq!(config.effective_depth(Some(0)), None);
        assert_eq!(config.effective_depth(Some(300)), Some(300));

        let full = CacheConfig {
            default_clone_depth: 0,
            ..CacheConfig::default()
        };
        assert_eq!(full.effective_depth(None), None);
    }

    #[test]
    fn test_cache_root_resolution_order() {
        let explicit = PathBuf::from("/explicit");
        let env = PathBuf::from("/from-env");
        let home = PathBuf::from("/home/dev");

        assert_eq!(
            resolve_cache_root_from(Some(&explicit), Some(env.clone()), Some(home.clone())),
            explicit
        );
        assert_eq!(
            resolve_cache_root_from(None, Some(env.clone()), Some(home.clone())),
            env
        );
        assert_eq!(
            resolve_cache_root_from(None, Some(PathBuf::new()), Some(home.clone())),
            home.join(".cache/ghi")
        );
        assert_eq!(
            resolve_cache_root_from(None, None, None),
            std::env::temp_dir().join("ghi-cache")
        );
    }

    #[test]
    fn test_layout_paths() {
        let config = CacheConfig::with_root("/c");
        assert_eq!(config.repos_dir(), PathBuf::from("/c/repos"));
        assert_eq!(config.record_path(), PathBuf::from("/c/cache_metadata.json"));
    }

    #[test]
    fn test_from_path_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = GhiConfig::from_path(&temp.path().join("missing.yaml")).unwrap();
        assert_eq!(config.cache.max_fetch_count, DEFAULT_MAX_FETCH_COUNT);
    }

    #[test]
    fn test_from_path_invalid_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(&path, "cache: [not, a, map").unwrap();
        assert!(matches!(
            GhiConfig::from_path(&path),
            Err(GhiError::InvalidConfiguration { .. })
        ));
    }
}
