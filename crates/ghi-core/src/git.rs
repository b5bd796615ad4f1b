//! Git access for working copies.
//!
//! [`GitAccess`] is the narrow set of operations the cache and extractor need.
//! [`GitCli`] implements it by spawning the `git` binary. Tests substitute
//! in-process fakes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, trace};

use crate::constants::{ORIGIN_REMOTE, PATH_TOO_LONG_MARKERS, SHALLOW_HISTORY_MARKERS};
use crate::process::{run_command, CommandOutput};
use crate::types::{ChangeKind, ChangedFile, CommitCandidate, CommitQuery};

// ============================================================================
// GitError
// ============================================================================

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A checked-out path exceeded the platform limit.
    #[error("path too long: {stderr}")]
    PathTooLong { stderr: String },

    /// History needed by the command is missing from a shallow clone.
    #[error("history not available in shallow clone: {message}")]
    ShallowHistory { message: String },

    /// git exited with a failure status.
    #[error("git {command} exited with {code}: {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    /// git could not be started or timed out.
    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// git output could not be parsed.
    #[error("unexpected git output: {message}")]
    Parse { message: String },
}

impl GitError {
    /// Classify a failed invocation from its stderr.
    pub fn from_output(command: &str, output: &CommandOutput) -> Self {
        let stderr = output.stderr.trim().to_string();
        let lowered = stderr.to_lowercase();

        if PATH_TOO_LONG_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Self::PathTooLong { stderr };
        }
        if SHALLOW_HISTORY_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Self::ShallowHistory { message: stderr };
        }
        Self::Command {
            command: command.to_string(),
            code: output.code(),
            stderr,
        }
    }

    pub fn is_shallow_signal(&self) -> bool {
        matches!(self, Self::ShallowHistory { .. })
    }

    pub fn is_path_too_long(&self) -> bool {
        matches!(self, Self::PathTooLong { .. })
    }
}

pub type GitResult<T> = Result<T, GitError>;

// ============================================================================
// GitAccess
// ============================================================================

/// Operations against a local working copy.
pub trait GitAccess: Send + Sync {
    /// Clone `url` into `dest`. `depth` of `None` fetches full history.
    fn clone_at(&self, url: &str, dest: &Path, depth: Option<u32>) -> GitResult<()>;

    /// Fetch the default branch, keeping the current shallow boundary.
    fn fetch(&self, path: &Path) -> GitResult<()>;

    /// Fetch so that history reaches `depth` commits behind the tip.
    fn fetch_at(&self, path: &Path, depth: u32) -> GitResult<()>;

    /// Fetch the complete history. A plain fetch when already complete.
    fn fetch_unshallow(&self, path: &Path) -> GitResult<()>;

    /// Hard reset the worktree to the remote's default branch tip.
    fn reset_hard_to_remote_head(&self, path: &Path) -> GitResult<()>;

    fn commit_exists(&self, path: &Path, id: &str) -> GitResult<bool>;

    /// List commits most recent first.
    fn list_commits(&self, path: &Path, query: &CommitQuery) -> GitResult<Vec<CommitCandidate>>;

    /// Whether `path` is the top level of a git working copy.
    fn is_repository(&self, path: &Path) -> bool;

    fn is_shallow(&self, path: &Path) -> GitResult<bool>;

    /// Configured URL of `remote`, if any.
    fn remote_url(&self, path: &Path, remote: &str) -> GitResult<Option<String>>;
}

impl<T: GitAccess + ?Sized> GitAccess for Arc<T> {
    fn clone_at(&self, url: &str, dest: &Path, depth: Option<u32>) -> GitResult<()> {
        (**self).clone_at(url, dest, depth)
    }
    fn fetch(&self, path: &Path) -> GitResult<()> {
        (**self).fetch(path)
    }
    fn fetch_at(&self, path: &Path, depth: u32) -> GitResult<()> {
        (**self).fetch_at(path, depth)
    }
    fn fetch_unshallow(&self, path: &Path) -> GitResult<()> {
        (**self).fetch_unshallow(path)
    }
    fn reset_hard_to_remote_head(&self, path: &Path) -> GitResult<()> {
        (**self).reset_hard_to_remote_head(path)
    }
    fn commit_exists(&self, path: &Path, id: &str) -> GitResult<bool> {
        (**self).commit_exists(path, id)
    }
    fn list_commits(&self, path: &Path, query: &CommitQuery) -> GitResult<Vec<CommitCandidate>> {
        (**self).list_commits(path, query)
    }
    fn is_repository(&self, path: &Path) -> bool {
        (**self).is_repository(path)
    }
    fn is_shallow(&self, path: &Path) -> GitResult<bool> {
        (**self).is_shallow(path)
    }
    fn remote_url(&self, path: &Path, remote: &str) -> GitResult<Option<String>> {
        (**self).remote_url(path, remote)
    }
}

// ============================================================================
// GitCli
// ============================================================================

/// Field separator inside one log record.
const FIELD_SEP: char = '\u{1f}';
/// Record separator between commits.
const RECORD_SEP: char = '\u{1e}';

const LOG_FORMAT: &str = "--format=%x1e%H%x1f%P%x1f%an%x1f%ae%x1f%aI%x1f%s";

/// [`GitAccess`] backed by the `git` executable.
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    program: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific git executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Kill any git invocation that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether a usable git binary is on the path.
    pub fn is_available(&self) -> bool {
        let mut cmd = self.command(None);
        cmd.arg("--version");
        run_command(cmd, self.timeout)
            .map(|o| o.success())
            .unwrap_or(false)
    }

    fn command(&self, cwd: Option<&Path>) -> Command {
        let program = self
            .program
            .as_deref()
            .unwrap_or_else(|| Path::new("git"));
        let mut cmd = Command::new(program);
        if let Some(cwd) = cwd {
            // Cached copies may belong to another user (containers, shared volumes).
            for dir in safe_directories(cwd) {
                cmd.arg("-c").arg(format!("safe.directory={}", dir));
            }
            cmd.arg("-C").arg(cwd);
        }
        // Never block on a credential prompt.
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    fn exec(&self, cwd: Option<&Path>, args: &[&str]) -> GitResult<CommandOutput> {
        let label = subcommand(args).to_string();
        let mut cmd = self.command(cwd);
        cmd.args(args);
        trace!("git {:?} in {:?}", args, cwd);

        run_command(cmd, self.timeout).map_err(|source| GitError::Spawn {
            command: label,
            source,
        })
    }

    /// Run and require success.
    fn run(&self, cwd: Option<&Path>, args: &[&str]) -> GitResult<String> {
        let output = self.exec(cwd, args)?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(GitError::from_output(subcommand(args), &output))
        }
    }
}

impl GitAccess for GitCli {
    fn clone_at(&self, url: &str, dest: &Path, depth: Option<u32>) -> GitResult<()> {
        let dest_str = dest.to_string_lossy().into_owned();
        let source = clone_source(url, depth);
        debug!("Cloning {} into {:?} (depth {:?})", source, dest, depth);

        let depth_str = depth.map(|d| d.to_string());
        let mut args = vec!["-c", "core.longpaths=true", "clone", "--single-branch"];
        if let Some(depth) = depth_str.as_deref() {
            args.push("--depth");
            args.push(depth);
        }
        args.extend(["--", source.as_str(), dest_str.as_str()]);

        let output = self.exec(None, &args)?;
        if output.success() {
            Ok(())
        } else {
            Err(GitError::from_output("clone", &output))
        }
    }

    fn fetch(&self, path: &Path) -> GitResult<()> {
        self.run(Some(path), &["fetch", "--quiet", ORIGIN_REMOTE])
            .map(|_| ())
    }

    fn fetch_at(&self, path: &Path, depth: u32) -> GitResult<()> {
        let depth = format!("--depth={}", depth);
        self.run(Some(path), &["fetch", "--quiet", &depth, ORIGIN_REMOTE])
            .map(|_| ())
    }

    fn fetch_unshallow(&self, path: &Path) -> GitResult<()> {
        if self.is_shallow(path)? {
            self.run(Some(path), &["fetch", "--quiet", "--unshallow", ORIGIN_REMOTE])
                .map(|_| ())
        } else {
            self.fetch(path)
        }
    }

    fn reset_hard_to_remote_head(&self, path: &Path) -> GitResult<()> {
        let remote_head = format!("{}/HEAD", ORIGIN_REMOTE);
        match self.run(Some(path), &["reset", "--quiet", "--hard", &remote_head]) {
            Ok(_) => Ok(()),
            Err(err) => {
                debug!("reset to {} failed ({}), trying FETCH_HEAD", remote_head, err);
                self.run(Some(path), &["reset", "--quiet", "--hard", "FETCH_HEAD"])
                    .map(|_| ())
            }
        }
    }

    fn commit_exists(&self, path: &Path, id: &str) -> GitResult<bool> {
        let spec = format!("{}^{{commit}}", id);
        let output = self.exec(Some(path), &["cat-file", "-e", &spec])?;
        Ok(output.success())
    }

    fn list_commits(&self, path: &Path, query: &CommitQuery) -> GitResult<Vec<CommitCandidate>> {
        let mut args: Vec<String> = vec![
            "log".to_string(),
            LOG_FORMAT.to_string(),
            "--name-status".to_string(),
            "--no-renames".to_string(),
        ];
        // Rename detection is costly on large histories; keep it for short windows.
        if query.max_count.is_some_and(|n| n <= 1_000) {
            args.pop();
            args.push("--find-renames".to_string());
        }
        if query.skip > 0 {
            args.push(format!("--skip={}", query.skip));
        }
        if let Some(max) = query.max_count {
            args.push(format!("--max-count={}", max));
        }
        if let Some(since) = query.since {
            args.push(format!("--since={}", git_date(since)));
        }
        if let Some(until) = query.until {
            args.push(format!("--until={}", git_date(until)));
        }
        args.push("HEAD".to_string());

        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run(Some(path), &refs)?;
        parse_log(&stdout)
    }

    fn is_repository(&self, path: &Path) -> bool {
        if !path.is_dir() {
            return false;
        }
        let Ok(top) = self.run(Some(path), &["rev-parse", "--show-toplevel"]) else {
            return false;
        };
        let top = PathBuf::from(top.trim());
        match (std::fs::canonicalize(&top), std::fs::canonicalize(path)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    fn is_shallow(&self, path: &Path) -> GitResult<bool> {
        let out = self.run(Some(path), &["rev-parse", "--is-shallow-repository"])?;
        Ok(out.trim() == "true")
    }

    fn remote_url(&self, path: &Path, remote: &str) -> GitResult<Option<String>> {
        let key = format!("remote.{}.url", remote);
        let output = self.exec(Some(path), &["config", "--get", &key])?;
        match output.code() {
            0 => Ok(Some(output.stdout.trim().to_string())),
            // `git config --get` exits 1 when the key is unset.
            1 => Ok(None),
            _ => Err(GitError::from_output("config", &output)),
        }
    }
}

/// First argument that names a subcommand, skipping `-c key=value` options.
fn subcommand<'a>(args: &[&'a str]) -> &'a str {
    args.iter()
        .copied()
        .find(|a| !a.starts_with('-') && !a.contains('='))
        .unwrap_or("")
}

/// Local sources need a `file://` URL for `--depth` to take effect.
fn clone_source(url: &str, depth: Option<u32>) -> String {
    if depth.is_some() && !ghi_utils::is_remote_locator(url) && !url.contains("://") {
        let path = Path::new(url);
        if let Ok(abs) = std::fs::canonicalize(path) {
            return format!("file://{}", abs.to_string_lossy().replace('\\', "/"));
        }
    }
    url.to_string()
}

fn git_date(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse `git log` output produced with [`LOG_FORMAT`] and `--name-status`.
fn parse_log(stdout: &str) -> GitResult<Vec<CommitCandidate>> {
    let mut commits = Vec::new();

    for record in stdout.split(RECORD_SEP) {
        let record = record.trim_matches(|c| c == '\n' || c == '\r');
        if record.is_empty() {
            continue;
        }

        let mut lines = record.lines();
        let header = lines.next().unwrap_or_default();
        let fields: Vec<&str> = header.split(FIELD_SEP).collect();
        if fields.len() < 6 {
            return Err(GitError::Parse {
                message: format!("expected 6 fields, got {}: {:?}", fields.len(), header),
            });
        }

        let timestamp = DateTime::parse_from_rfc3339(fields[4])
            .map_err(|e| GitError::Parse {
                message: format!("bad timestamp {:?}: {}", fields[4], e),
            })?
            .with_timezone(&Utc);

        let changed_files = lines.filter_map(parse_name_status).collect();

        commits.push(CommitCandidate {
            id: fields[0].to_string(),
            parents: fields[1].split_whitespace().map(str::to_string).collect(),
            author: fields[2].to_string(),
            author_email: fields[3].to_string(),
            timestamp,
            message_summary: fields[5..].join("\u{1f}"),
            changed_files,
        });
    }

    Ok(commits)
}

fn parse_name_status(line: &str) -> Option<ChangedFile> {
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }
    let mut parts = line.split('\t');
    let status = parts.next()?;
    let first = parts.next()?;
    let change = ChangeKind::from_status(status);
    match (change, parts.next()) {
        (ChangeKind::Renamed | ChangeKind::Copied, Some(second)) => Some(ChangedFile {
            path: second.to_string(),
            change,
            previous_path: Some(first.to_string()),
        }),
        _ => Some(ChangedFile {
            path: first.to_string(),
            change,
            previous_path: None,
        }),
    }
}

/// Forms of `dir` to trust for this invocation only. Git matches the real
/// path, so the canonical form is added when it differs.
fn safe_directories(dir: &Path) -> Vec<String> {
    let given = dir.to_string_lossy().replace('\\', "/");
    let mut dirs = vec![given];
    if let Ok(real) = std::fs::canonicalize(dir) {
        let real = real.to_string_lossy().replace('\\', "/");
        let real = real.strip_prefix("//?/").unwrap_or(&real).to_string();
        if !dirs.contains(&real) {
            dirs.push(real);
        }
    }
    dirs
}

// ============================================================================
// Tests
// ============================================================================
