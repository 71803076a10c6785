//! Project-root resolution.
//!
//! Resolves the directory the server treats as the current project through
//! a deterministic chain, first success wins:
//!
//! 1. `WORKSPACE_FOLDER_PATHS` — colon-separated, first existing directory
//! 2. git top level of the current directory
//! 3. `$PWD`
//! 4. the process working directory
//!
//! Every candidate must pass security validation and exist as a directory.
//! The winner is symlink-resolved before use.

use crate::error::Result;
use crate::security;
use crate::services::git;
use std::path::{Path, PathBuf};

/// A resolved project root plus its display name.
#[derive(Debug, Clone)]
pub struct ProjectRoot {
    pub path: PathBuf,
    pub name: String,
    pub was_sanitized: bool,
}

/// Resolves the active project root.
///
/// Deterministic for a fixed environment and filesystem state.
///
/// # Errors
///
/// Returns `ServerError::ProjectRoot` when no candidate in the chain
/// resolves to a valid directory.
pub fn resolve_project_root(git_timeout_secs: u64) -> Result<ProjectRoot> {
    for candidate in candidates(git_timeout_secs) {
        match security::validate_root_candidate(&candidate) {
            Ok(resolved) => {
                let (name, was_sanitized) = sanitize_project_name(&resolved);
                tracing::debug!(root = %resolved.display(), "Resolved project root");
                return Ok(ProjectRoot {
                    path: resolved,
                    name,
                    was_sanitized,
                });
            }
            Err(e) => {
                tracing::debug!(candidate = %candidate.display(), reason = %e, "Skipping root candidate");
            }
        }
    }
    Err(crate::error::ServerError::ProjectRoot(
        "no candidate from WORKSPACE_FOLDER_PATHS, git, PWD, or cwd is a usable directory".into(),
    ))
}

/// Yields root candidates in resolution order.
fn candidates(git_timeout_secs: u64) -> Vec<PathBuf> {
    let mut out = Vec::new();

    if let Ok(folders) = std::env::var("WORKSPACE_FOLDER_PATHS") {
        for entry in folders.split(':').filter(|s| !s.is_empty()) {
            let p = PathBuf::from(entry);
            if p.is_dir() {
                out.push(p);
                break; // first existing entry wins within this step
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        if let Some(top) = git::top_level(&cwd, git_timeout_secs) {
            out.push(top);
        }
    }

    if let Ok(pwd) = std::env::var("PWD") {
        if !pwd.is_empty() {
            out.push(PathBuf::from(pwd));
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        out.push(cwd);
    }

    out
}

/// Derives the project name from the root's final path segment.
///
/// Characters outside `[A-Za-z0-9._\- ]` are replaced with `_`; the second
/// element reports whether anything changed.
#[must_use]
pub fn sanitize_project_name(root: &Path) -> (String, bool) {
    let raw = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("project");

    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let was_sanitized = sanitized != raw;
    (sanitized, was_sanitized)
}
