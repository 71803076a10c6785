//! Read-only git introspection.
//!
//! Every query shells out to `git -C <root> …` with a hard deadline; a
//! missing binary or a non-repo root degrades to empty results instead of
//! failing the request. Expensive queries are cached per project root in
//! the `git` cache namespace.

use crate::cache::Cache;
use crate::error::GitError;
use ahash::AHashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Branch/head/dirty snapshot for `get_project_info`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GitInfo {
    pub branch: String,
    pub head: String,
    pub dirty: bool,
}

/// Aggregate of `status --porcelain`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSummary {
    pub modified: usize,
    pub untracked: usize,
    pub staged: usize,
}

/// Runs one git subcommand under a deadline, returning trimmed stdout.
///
/// The child's stdout is drained on a separate thread so a chatty command
/// cannot deadlock on a full pipe while we poll for exit.
pub fn run_git(root: &Path, args: &[&str], timeout_secs: u64) -> Result<String, GitError> {
    let command_label = args.first().copied().unwrap_or("git").to_string();

    let mut child = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitError::NotInstalled
            } else {
                GitError::Spawn(e)
            }
        })?;

    let mut stdout_pipe = child.stdout.take();
    let reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(ref mut out) = stdout_pipe {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });

    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(GitError::Timeout {
                    command: command_label,
                    seconds: timeout_secs,
                });
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => {
                let _ = child.kill();
                return Err(GitError::Spawn(e));
            }
        }
    };

    let stdout = reader.join().unwrap_or_default();

    if !status.success() {
        let mut stderr = String::new();
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr);
        }
        return Err(GitError::CommandFailed {
            command: command_label,
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&stdout).trim().to_string())
}

/// True when `root` is inside a git work tree.
#[must_use]
pub fn is_repo(root: &Path, timeout_secs: u64) -> bool {
    matches!(
        run_git(root, &["rev-parse", "--is-inside-work-tree"], timeout_secs).as_deref(),
        Ok("true")
    )
}

/// The repository top level containing `root`, if any.
#[must_use]
pub fn top_level(root: &Path, timeout_secs: u64) -> Option<PathBuf> {
    run_git(root, &["rev-parse", "--show-toplevel"], timeout_secs)
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Tracker bound to one project root, caching query results.
pub struct GitTracker<'a> {
    root: &'a Path,
    cache: &'a Cache,
    timeout_secs: u64,
    cache_ttl: Duration,
}

const NS: &str = "git";

impl<'a> GitTracker<'a> {
    #[must_use]
    pub fn new(root: &'a Path, cache: &'a Cache, timeout_secs: u64, cache_ttl_secs: u64) -> Self {
        Self {
            root,
            cache,
            timeout_secs,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
        }
    }

    fn key(&self, op: &str) -> String {
        format!("{}:{}", op, self.root.display())
    }

    /// Branch, head commit, and dirtiness; `None` outside a repository.
    #[must_use]
    pub fn info(&self) -> Option<GitInfo> {
        if let Some(cached) = self.cache.get::<Option<GitInfo>>(NS, &self.key("info")) {
            return cached;
        }

        let info = self.query_info();
        let _ = self
            .cache
            .put(NS, &self.key("info"), &info, Some(self.cache_ttl));
        info
    }

    fn query_info(&self) -> Option<GitInfo> {
        if !is_repo(self.root, self.timeout_secs) {
            return None;
        }
        let branch = run_git(
            self.root,
            &["rev-parse", "--abbrev-ref", "HEAD"],
            self.timeout_secs,
        )
        .unwrap_or_else(|_| "HEAD".into());
        let head = run_git(self.root, &["rev-parse", "--short", "HEAD"], self.timeout_secs)
            .unwrap_or_default();
        let dirty = run_git(self.root, &["status", "--porcelain"], self.timeout_secs)
            .map(|out| !out.is_empty())
            .unwrap_or(false);
        Some(GitInfo { branch, head, dirty })
    }

    /// Files touched by commits in the last `days` days, mapped to the
    /// epoch seconds of their most recent touch. Empty outside a repo.
    #[must_use]
    pub fn recent_files(&self, days: u64) -> AHashMap<String, i64> {
        let key = self.key(&format!("recent:{days}"));
        if let Some(cached) = self.cache.get::<AHashMap<String, i64>>(NS, &key) {
            return cached;
        }

        let map = self.query_recent_files(days);
        let _ = self.cache.put(NS, &key, &map, Some(self.cache_ttl));
        map
    }

    fn query_recent_files(&self, days: u64) -> AHashMap<String, i64> {
        let since = format!("--since={days} days ago");
        let output = match run_git(
            self.root,
            &["log", &since, "--name-only", "--pretty=format:%ct"],
            self.timeout_secs,
        ) {
            Ok(out) => out,
            Err(e) => {
                tracing::debug!(root = %self.root.display(), "git log unavailable: {e}");
                return AHashMap::new();
            }
        };

        // Output alternates: a %ct timestamp line, then the commit's file
        // names until a blank line. The log is newest-first, so first-seen
        // wins per file.
        let mut map = AHashMap::new();
        let mut current_ts = 0i64;
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(ts) = line.parse::<i64>() {
                current_ts = ts;
            } else if current_ts > 0 {
                map.entry(line.to_string()).or_insert(current_ts);
            }
        }
        map
    }

    /// Counts from `status --porcelain`. Empty outside a repo.
    #[must_use]
    pub fn status_summary(&self) -> StatusSummary {
        let key = self.key("status");
        if let Some(cached) = self.cache.get::<StatusSummary>(NS, &key) {
            return cached;
        }

        let summary = match run_git(self.root, &["status", "--porcelain"], self.timeout_secs) {
            Ok(out) => {
                let mut summary = StatusSummary::default();
                for line in out.lines() {
                    let mut chars = line.chars();
                    let staged = chars.next().unwrap_or(' ');
                    let worktree = chars.next().unwrap_or(' ');
                    if staged == '?' {
                        summary.untracked += 1;
                    } else {
                        if staged != ' ' {
                            summary.staged += 1;
                        }
                        if worktree != ' ' {
                            summary.modified += 1;
                        }
                    }
                }
                summary
            }
            Err(_) => StatusSummary::default(),
        };

        let _ = self.cache.put(NS, &key, &summary, Some(self.cache_ttl));
        summary
    }
}
