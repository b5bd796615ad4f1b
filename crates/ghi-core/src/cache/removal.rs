//! Escalating forced removal of working-copy directories.
//!
//! A directory may be held open by another process (an editor, an indexer,
//! antivirus), carry read-only attributes, or contain paths too long for the
//! plain delete APIs. [`RemovalLadder`] tries a fixed sequence of
//! [`RemovalStrategy`] implementations, each under a bounded [`RetryPolicy`],
//! and stops at the first one after which the directory is gone.
//!
//! Standard ladder:
//!
//! 1. [`PlainDelete`]
//! 2. [`ClearReadOnly`] then delete
//! 3. [`RenameThenDelete`] to a disposable sibling
//! 4. [`EmptyMirror`]: mirror an empty directory over it, then delete
//! 5. [`PlatformForceRemove`]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{debug, error, warn};

use crate::config::RemovalConfig;
use crate::constants::DISPOSABLE_DIR_PREFIX;
use crate::errors::GhiError;
use crate::process::run_command;
use crate::progress::{Progress, ProgressEvent};

// ============================================================================
// RetryPolicy
// ============================================================================

/// Bounded retry for one removal strategy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before giving up (at least 1).
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RemovalConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RemovalConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: config.retry_delay(),
        }
    }

    /// Run `operation` until it succeeds or attempts run out.
    ///
    /// Returns the result of the last attempt and the number of attempts made.
    pub fn run<T, F>(&self, label: &str, mut operation: F) -> (anyhow::Result<T>, u32)
    where
        F: FnMut() -> anyhow::Result<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation() {
                Ok(result) => return (Ok(result), attempt),
                Err(e) if attempt >= max_attempts => return (Err(e), attempt),
                Err(e) => {
                    debug!(
                        "{} failed (attempt {}/{}): {:#}. Retrying in {:?}",
                        label, attempt, max_attempts, e, self.delay
                    );
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                }
            }
        }
    }
}

// ============================================================================
// RemovalStrategy
// ============================================================================

/// One way of getting rid of a directory.
///
/// Implementations report their own failure, but the ladder only trusts the
/// filesystem: a strategy has succeeded when the path no longer exists.
pub trait RemovalStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn remove(&self, path: &Path) -> anyhow::Result<()>;
}

/// `remove_dir_all`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDelete;

impl RemovalStrategy for PlainDelete {
    fn name(&self) -> &'static str {
        "plain-delete"
    }

    fn remove(&self, path: &Path) -> anyhow::Result<()> {
        fs::remove_dir_all(path).with_context(|| format!("remove_dir_all {}", path.display()))
    }
}

/// Make every entry writable, then `remove_dir_all`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearReadOnly;

impl ClearReadOnly {
    fn make_writable(path: &Path) -> anyhow::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.file_type().is_symlink() {
            return Ok(());
        }

        let mut perms = meta.permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let extra = if meta.is_dir() { 0o700 } else { 0o600 };
            perms.set_mode(perms.mode() | extra);
        }
        #[cfg(not(unix))]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;

        if meta.is_dir() {
            for child in fs::read_dir(path)? {
                // Keep going past individual failures; the delete decides.
                if let Err(e) = Self::make_writable(&child?.path()) {
                    debug!("Could not clear attributes under {:?}: {}", path, e);
                }
            }
        }
        Ok(())
    }
}

impl RemovalStrategy for ClearReadOnly {
    fn name(&self) -> &'static str {
        "clear-read-only"
    }

    fn remove(&self, path: &Path) -> anyhow::Result<()> {
        Self::make_writable(path)
            .with_context(|| format!("clear attributes under {}", path.display()))?;
        fs::remove_dir_all(path).with_context(|| format!("remove_dir_all {}", path.display()))
    }
}

/// Move the directory aside to `_temp_delete_<id>`, then delete the copy.
///
/// The rename frees the original path even when files inside stay open. The
/// follow-up delete is best effort; a leftover is swept by the next
/// `clear_all`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameThenDelete;

impl RenameThenDelete {
    fn disposable_path(path: &Path) -> PathBuf {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}{}", DISPOSABLE_DIR_PREFIX, &id[..8]);
        match path.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }
}

impl RemovalStrategy for RenameThenDelete {
    fn name(&self) -> &'static str {
        "rename-then-delete"
    }

    fn remove(&self, path: &Path) -> anyhow::Result<()> {
        let aside = Self::disposable_path(path);
        fs::rename(path, &aside)
            .with_context(|| format!("rename {} -> {}", path.display(), aside.display()))?;

        if let Err(e) = fs::remove_dir_all(&aside) {
            warn!("Renamed {:?} aside to {:?} but could not delete it: {}", path, aside, e);
        }
        Ok(())
    }
}

/// Mirror an empty directory over the target, then remove the empty shell.
///
/// Uses `robocopy /MIR` on Windows and `rsync --delete` elsewhere; both cope
/// with paths the regular delete APIs reject.
#[derive(Debug, Clone, Default)]
pub struct EmptyMirror {
    pub timeout: Option<Duration>,
}

impl EmptyMirror {
    #[cfg(windows)]
    fn mirror(&self, empty: &Path, target: &Path) -> anyhow::Result<()> {
        let mut cmd = Command::new("robocopy");
        cmd.arg(empty)
            .arg(target)
            .args(["/MIR", "/NFL", "/NDL", "/NJH", "/NJS", "/NP", "/R:1", "/W:1"]);
        let output = run_command(cmd, self.timeout).context("spawn robocopy")?;
        // robocopy exit codes below 8 mean success.
        if output.code() >= 8 || output.code() < 0 {
            bail!("robocopy exited with {}: {}", output.code(), output.stderr.trim());
        }
        Ok(())
    }

    #[cfg(not(windows))]
    fn mirror(&self, empty: &Path, target: &Path) -> anyhow::Result<()> {
        let mut cmd = Command::new("rsync");
        cmd.args(["-a", "--delete"])
            .arg(format!("{}/", empty.display()))
            .arg(format!("{}/", target.display()));
        let output = run_command(cmd, self.timeout).context("spawn rsync")?;
        if !output.success() {
            bail!("rsync exited with {}: {}", output.code(), output.stderr.trim());
        }
        Ok(())
    }
}

impl RemovalStrategy for EmptyMirror {
    fn name(&self) -> &'static str {
        "empty-mirror"
    }

    fn remove(&self, path: &Path) -> anyhow::Result<()> {
        let empty = empty_sibling_dir(path)?;
        let result = self.mirror(&empty, path);
        if let Err(e) = fs::remove_dir(&empty) {
            debug!("Could not remove mirror source {:?}: {}", empty, e);
        }
        result?;
        fs::remove_dir(path).with_context(|| format!("remove emptied {}", path.display()))
    }
}

/// Create an empty sibling directory for mirroring.
fn empty_sibling_dir(path: &Path) -> anyhow::Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let id = uuid::Uuid::new_v4().simple().to_string();
    let empty = parent.join(format!("{}empty_{}", DISPOSABLE_DIR_PREFIX, &id[..8]));
    fs::create_dir_all(&empty).with_context(|| format!("create {}", empty.display()))?;
    Ok(empty)
}

/// The platform's own forced delete: `rmdir /s /q` or `rm -rf`.
#[derive(Debug, Clone, Default)]
pub struct PlatformForceRemove {
    pub timeout: Option<Duration>,
}

impl RemovalStrategy for PlatformForceRemove {
    fn name(&self) -> &'static str {
        "platform-force-remove"
    }

    fn remove(&self, path: &Path) -> anyhow::Result<()> {
        #[cfg(windows)]
        let cmd = {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "rmdir", "/S", "/Q"]).arg(path);
            cmd
        };
        #[cfg(not(windows))]
        let cmd = {
            let mut cmd = Command::new("rm");
            cmd.arg("-rf").arg("--").arg(path);
            cmd
        };

        let output = run_command(cmd, self.timeout).context("spawn force remove")?;
        if !output.success() {
            bail!(
                "force remove exited with {}: {}",
                output.code(),
                output.stderr.trim()
            );
        }
        Ok(())
    }
}

// ============================================================================
// RemovalLadder
// ============================================================================

/// Result of a successful removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalOutcome {
    /// The strategy that removed the directory. `None` if it was already gone.
    pub strategy: Option<&'static str>,
    /// Total attempts across all strategies.
    pub attempts: u32,
}

/// Ordered list of removal strategies with per-strategy retry.
pub struct RemovalLadder {
    strategies: Vec<Box<dyn RemovalStrategy>>,
    retry: RetryPolicy,
    progress: Progress,
}

impl std::fmt::Debug for RemovalLadder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemovalLadder")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("retry", &self.retry)
            .finish()
    }
}

impl RemovalLadder {
    pub fn new(strategies: Vec<Box<dyn RemovalStrategy>>, retry: RetryPolicy) -> Self {
        Self {
            strategies,
            retry,
            progress: Progress::none(),
        }
    }

    /// The five-step ladder.
    pub fn standard(config: &RemovalConfig) -> Self {
        let timeout = Some(config.command_timeout());
        Self::new(
            vec![
                Box::new(PlainDelete),
                Box::new(ClearReadOnly),
                Box::new(RenameThenDelete),
                Box::new(EmptyMirror { timeout }),
                Box::new(PlatformForceRemove { timeout }),
            ],
            RetryPolicy::from_config(config),
        )
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Remove `path`, escalating through the ladder.
    ///
    /// # Errors
    ///
    /// [`GhiError::RemovalFailed`] once every strategy has exhausted its retries.
    pub fn remove(&self, path: &Path) -> Result<RemovalOutcome, GhiError> {
        if !exists(path) {
            return Ok(RemovalOutcome {
                strategy: None,
                attempts: 0,
            });
        }

        let mut total_attempts = 0;

        for (rung, strategy) in self.strategies.iter().enumerate() {
            if rung > 0 {
                warn!("Escalating removal of {:?} to {}", path, strategy.name());
                self.progress.emit(ProgressEvent::RemovalEscalated {
                    path: path.to_path_buf(),
                    strategy: strategy.name().to_string(),
                });
            }

            let (result, attempts) = self.retry.run(strategy.name(), || {
                let outcome = strategy.remove(path);
                if !exists(path) {
                    return Ok(());
                }
                outcome?;
                bail!("{} still exists", path.display())
            });
            total_attempts += attempts;

            match result {
                Ok(()) => {
                    debug!(
                        "Removed {:?} with {} after {} attempts",
                        path,
                        strategy.name(),
                        total_attempts
                    );
                    return Ok(RemovalOutcome {
                        strategy: Some(strategy.name()),
                        attempts: total_attempts,
                    });
                }
                Err(e) => debug!("{} gave up on {:?}: {:#}", strategy.name(), path, e),
            }
        }

        error!(
            "Cannot remove directory {:?} after {} attempts; manual cleanup required",
            path, total_attempts
        );
        Err(GhiError::RemovalFailed {
            path: path.to_path_buf(),
            attempts: total_attempts,
        })
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

// ============================================================================
// Tests
// ============================================================================
