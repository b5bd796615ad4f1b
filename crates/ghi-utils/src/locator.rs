//! Source locator canonicalization.
//!
//! Every locator form that can name a repository goes through
//! [`canonicalize_locator`] before it is hashed:
//!
//! - `https://host/owner/repo(.git)` and `http://...`
//! - `ssh://[user@]host[:port]/owner/repo(.git)` and `git://...`
//! - scp-like `user@host:owner/repo(.git)`
//! - `file://` URLs and plain local paths (relative or absolute)
//!
//! Network forms for the same host and path collapse to one
//! `https://host/path` string, so a repository cloned over SSH and later
//! requested over HTTPS maps to the same [`SourceKey`].

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::UtilsError;

/// Number of hex characters kept from the SHA-256 digest.
pub const SOURCE_KEY_LEN: usize = 16;

const URL_SCHEMES: &[&str] = &["https", "http", "ssh", "git+ssh", "git"];

// ============================================================================
// SourceKey
// ============================================================================

/// Stable hash of a canonical source locator.
///
/// Used as the cache map key and as the working-copy directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKey(String);

impl SourceKey {
    /// Wrap an already-computed key (e.g. one read back from disk).
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Hash a canonical locator string.
    pub fn from_canonical(canonical: &str) -> Self {
        let digest = Sha256::digest(canonical.as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(SOURCE_KEY_LEN);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// CanonicalLocator
// ============================================================================

/// Whether a locator names a network remote or a local directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorKind {
    Remote,
    Local,
}

/// The canonical form of a source locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalLocator {
    kind: LocatorKind,
    canonical: String,
}

impl CanonicalLocator {
    pub fn kind(&self) -> LocatorKind {
        self.kind
    }

    pub fn is_remote(&self) -> bool {
        self.kind == LocatorKind::Remote
    }

    /// The normalized string that is hashed into a [`SourceKey`].
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn key(&self) -> SourceKey {
        SourceKey::from_canonical(&self.canonical)
    }
}

impl fmt::Display for CanonicalLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

// ============================================================================
// Public Functions
// ============================================================================

/// Canonicalize any supported locator form.
///
/// # Errors
///
/// Returns [`UtilsError::InvalidLocator`] for empty input or a URL without a
/// host, and [`UtilsError::PathResolution`] if a relative local path cannot
/// be anchored to the current directory.
pub fn canonicalize_locator(raw: &str) -> Result<CanonicalLocator, UtilsError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UtilsError::InvalidLocator(raw.to_string()));
    }

    if let Some(rest) = strip_scheme(trimmed, "file") {
        return canonicalize_local(rest);
    }

    for scheme in URL_SCHEMES {
        if let Some(rest) = strip_scheme(trimmed, scheme) {
            return canonicalize_url(trimmed, scheme, rest);
        }
    }

    if let Some((host, path)) = parse_scp_like(trimmed) {
        return remote(trimmed, &host, &path);
    }

    canonicalize_local(trimmed)
}

/// Canonicalize and hash a locator in one step.
pub fn source_key(raw: &str) -> Result<SourceKey, UtilsError> {
    Ok(canonicalize_locator(raw)?.key())
}

/// Returns `true` if the locator names a network remote rather than a path.
pub fn is_remote_locator(raw: &str) -> bool {
    let trimmed = raw.trim();
    URL_SCHEMES
        .iter()
        .any(|scheme| strip_scheme(trimmed, scheme).is_some())
        || parse_scp_like(trimmed).is_some()
}

// ============================================================================
// Private Functions
// ============================================================================

fn strip_scheme<'a>(raw: &'a str, scheme: &str) -> Option<&'a str> {
    let prefix_len = scheme.len() + 3;
    if raw.len() < prefix_len {
        return None;
    }
    let (head, rest) = raw.split_at(prefix_len);
    if head.eq_ignore_ascii_case(&format!("{}://", scheme)) {
        Some(rest)
    } else {
        None
    }
}

fn scp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?P<user>[^@/\\\s]+)@)?(?P<host>[A-Za-z0-9][A-Za-z0-9.\-]*):(?P<path>[^/\\].*)$")
            .expect("Invalid regex")
    })
}

/// Match `user@host:path`. A bare `host:path` only counts when the host has a
/// dot, so Windows drive paths like `C:repo` stay local.
fn parse_scp_like(raw: &str) -> Option<(String, String)> {
    let caps = scp_regex().captures(raw)?;
    let host = caps.name("host")?.as_str();
    let has_user = caps.name("user").is_some();
    if !has_user && !host.contains('.') {
        return None;
    }
    Some((host.to_string(), caps.name("path")?.as_str().to_string()))
}

fn canonicalize_url(raw: &str, scheme: &str, rest: &str) -> Result<CanonicalLocator, UtilsError> {
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };

    // Drop userinfo; the host is everything after the last `@`.
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let host = match host_port.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
            if is_nondefault_http_port(scheme, port) {
                return remote(raw, host_port, path);
            }
            host
        }
        _ => host_port,
    };

    if host.is_empty() {
        return Err(UtilsError::InvalidLocator(raw.to_string()));
    }

    remote(raw, host, path)
}

/// A non-default port on an HTTP(S) URL names a different server, so it is
/// kept. SSH and git-daemon ports are transport details and are dropped.
fn is_nondefault_http_port(scheme: &str, port: &str) -> bool {
    match scheme {
        "https" => port != "443",
        "http" => port != "80",
        _ => false,
    }
}

fn remote(raw: &str, host: &str, path: &str) -> Result<CanonicalLocator, UtilsError> {
    let host = host.trim().to_lowercase();
    if host.is_empty() {
        return Err(UtilsError::InvalidLocator(raw.to_string()));
    }

    let mut path = path.trim().replace('\\', "/");
    while path.ends_with('/') {
        path.pop();
    }
    if let Some(stripped) = path.strip_suffix(".git") {
        path = stripped.to_string();
    }
    let path = path.trim_start_matches('/').to_lowercase();

    let canonical = if path.is_empty() {
        format!("https://{}", host)
    } else {
        format!("https://{}/{}", host, path)
    };

    Ok(CanonicalLocator {
        kind: LocatorKind::Remote,
        canonical,
    })
}

fn canonicalize_local(raw: &str) -> Result<CanonicalLocator, UtilsError> {
    let path = Path::new(raw);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| UtilsError::PathResolution {
                path: raw.to_string(),
                reason: e.to_string(),
            })?
            .join(path)
    };

    let resolved = std::fs::canonicalize(&absolute).unwrap_or_else(|_| lexical_normalize(&absolute));

    let mut canonical = fold_local_case(resolved.to_string_lossy().replace('\\', "/"));
    while canonical.len() > 1 && canonical.ends_with('/') {
        canonical.pop();
    }

    Ok(CanonicalLocator {
        kind: LocatorKind::Local,
        canonical,
    })
}

/// Local paths are only case-folded where the filesystem usually ignores case.
/// Elsewhere `/srv/Repo` and `/srv/repo` are different repositories.
#[cfg(any(windows, target_os = "macos"))]
fn fold_local_case(path: String) -> String {
    path.to_lowercase()
}

#[cfg(not(any(windows, target_os = "macos")))]
fn fold_local_case(path: String) -> String {
    path
}

/// Resolve `.` and `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
