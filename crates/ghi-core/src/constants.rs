//! Common constants used throughout ghi-core.
//!
//! This module centralizes paths, file names, and fixed strings so the cache,
//! config loader, and git layer agree on layout.

// ============================================================================
// Directory Names
// ============================================================================

/// The name of the global GHI configuration directory.
///
/// Located at `~/.ghi/` on Unix-like systems.
pub const GHI_HOME_DIR: &str = ".ghi";

/// Global configuration filename inside [`GHI_HOME_DIR`].
pub const CONFIG_FILENAME: &str = "config.yaml";

/// Environment variable that overrides the cache root.
pub const CACHE_DIR_ENV: &str = "GHI_CACHE_DIR";

/// Cache root under the user's home when no override is set.
///
/// Layout: `~/.cache/ghi/`
pub const HOME_CACHE_SUBDIR: &str = ".cache/ghi";

/// Cache root under the system temp dir when no home is available.
pub const TEMP_CACHE_DIRNAME: &str = "ghi-cache";

/// Subdirectory of the cache root holding working copies.
///
/// Layout: `<cacheRoot>/repos/<sourceKey>/`
pub const REPOS_DIR: &str = "repos";

// ============================================================================
// Cache Record
// ============================================================================

/// Durable cache record filename.
pub const CACHE_METADATA_FILENAME: &str = "cache_metadata.json";

/// Current durable record format version.
pub const CACHE_RECORD_VERSION: u32 = 1;

/// Prefix of directories renamed aside for deferred deletion.
pub const DISPOSABLE_DIR_PREFIX: &str = "_temp_delete_";

// ============================================================================
// Git
// ============================================================================

/// Remote name used for every clone.
pub const ORIGIN_REMOTE: &str = "origin";

/// Remediation for clones that fail on long checkout paths.
pub const LONG_PATHS_HINT: &str =
    "Enable long path support with `git config --system core.longpaths true` (may require administrator rights)";

/// git stderr fragments that indicate a checkout path exceeded the platform limit.
pub const PATH_TOO_LONG_MARKERS: &[&str] = &["filename too long", "unable to create file"];

/// git stderr fragments that indicate history is missing from a shallow clone.
pub const SHALLOW_HISTORY_MARKERS: &[&str] = &[
    "does not have",
    "unknown revision",
    "bad object",
    "shallow",
];

/// Commits fetched past `skipOffset` when a request has no explicit limit.
pub const DEFAULT_EXTRACTION_LIMIT: usize = 100;
