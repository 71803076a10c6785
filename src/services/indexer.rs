//! Filesystem indexer.
//!
//! Walks the project root breadth-first with gitignore support and streams
//! `FileEntry` values through a bounded channel, so scoring can start
//! before the walk finishes. Per-entry I/O errors are recorded and
//! skipped; an error at the root fails the call.

use crate::error::{Result, ServerError};
use crate::security::MAX_PATH_DEPTH;
use crate::types::FileEntry;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver};
use std::time::UNIX_EPOCH;

/// Directories skipped regardless of gitignore contents.
const BUILTIN_IGNORES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    ".next",
    ".nuxt",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    ".gradle",
    ".idea",
    ".vscode",
    "coverage",
    ".cache",
];

/// Bound of the streaming channel between walker and consumer.
const CHANNEL_BOUND: usize = 256;

/// Caller-tunable walk limits.
#[derive(Debug, Clone)]
pub struct IndexLimits {
    /// Stop after this many files.
    pub max_files: usize,
    /// Include dotfiles (default true per the tool contract).
    pub include_hidden: bool,
    /// Allow-list of normalized extensions (no dot); empty = all.
    pub extensions: Vec<String>,
}

impl Default for IndexLimits {
    fn default() -> Self {
        Self {
            max_files: 5000,
            include_hidden: true,
            extensions: Vec::new(),
        }
    }
}

/// Result of a finished walk.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// How many entries were skipped due to per-entry I/O errors.
    pub skipped_errors: usize,
    /// Whether the walk stopped at the file cap.
    pub truncated: bool,
}

/// Streaming project-file indexer.
pub struct FileIndexer {
    root: PathBuf,
    limits: IndexLimits,
}

impl FileIndexer {
    #[must_use]
    pub fn new(root: PathBuf, limits: IndexLimits) -> Self {
        Self { root, limits }
    }

    /// Collects all entries eagerly. Convenience over [`FileIndexer::stream`]
    /// for callers that need the whole listing anyway.
    pub fn collect(&self) -> Result<(Vec<FileEntry>, WalkOutcome)> {
        let (rx, handle) = self.stream()?;
        let entries: Vec<FileEntry> = rx.iter().collect();
        let outcome = handle.join().unwrap_or_default();
        Ok((entries, outcome))
    }

    /// Starts the walk on a worker thread and returns the receiving end of
    /// a bounded channel plus the walker handle (joins to a [`WalkOutcome`]).
    pub fn stream(
        &self,
    ) -> Result<(Receiver<FileEntry>, std::thread::JoinHandle<WalkOutcome>)> {
        if !self.root.is_dir() {
            return Err(ServerError::Tool(format!(
                "Project root '{}' is not a readable directory",
                self.root.display()
            )));
        }

        let (tx, rx) = sync_channel::<FileEntry>(CHANNEL_BOUND);
        let root = self.root.clone();
        let limits = self.limits.clone();

        let handle = std::thread::spawn(move || {
            let mut outcome = WalkOutcome::default();
            let mut emitted = 0usize;

            let mut builder = WalkBuilder::new(&root);
            builder
                .hidden(!limits.include_hidden)
                .git_ignore(true)
                .git_global(false)
                .git_exclude(false)
                // Honor root .gitignore rules even outside a git checkout,
                // but never rules from directories above the root.
                .require_git(false)
                .parents(false)
                .follow_links(false)
                .max_depth(Some(MAX_PATH_DEPTH))
                .filter_entry(|entry| {
                    let name = entry.file_name().to_string_lossy();
                    !BUILTIN_IGNORES.contains(&name.as_ref())
                });

            for item in builder.build() {
                if emitted >= limits.max_files {
                    outcome.truncated = true;
                    break;
                }
                let entry = match item {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::debug!("Skipping walk entry: {e}");
                        outcome.skipped_errors += 1;
                        continue;
                    }
                };
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }
                match to_file_entry(&root, entry.path(), &limits.extensions) {
                    Some(Ok(file)) => {
                        emitted += 1;
                        if tx.send(file).is_err() {
                            break; // consumer went away
                        }
                    }
                    Some(Err(())) => outcome.skipped_errors += 1,
                    None => {} // filtered by extension
                }
            }

            outcome
        });

        Ok((rx, handle))
    }
}

/// Converts one walked path into a [`FileEntry`]. `None` when filtered by
/// the extension allow-list, `Some(Err(()))` on a metadata failure.
fn to_file_entry(
    root: &Path,
    path: &Path,
    extensions: &[String],
) -> Option<std::result::Result<FileEntry, ()>> {
    let relative = path.strip_prefix(root).unwrap_or(path);

    let extension = relative
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    if !extensions.is_empty() {
        match &extension {
            Some(ext) if extensions.iter().any(|allow| allow == ext) => {}
            _ => return None,
        }
    }

    let metadata = match path.metadata() {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(path = %path.display(), "Skipping unreadable file: {e}");
            return Some(Err(()));
        }
    };

    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64);

    let directory_segments = relative
        .parent()
        .map(|p| {
            p.components()
                .filter_map(|c| match c {
                    std::path::Component::Normal(s) => {
                        s.to_str().map(str::to_string)
                    }
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Ok(FileEntry {
        relative_path: relative.to_path_buf(),
        size_bytes: metadata.len(),
        mtime,
        extension,
        directory_segments,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/dep")).unwrap();
        fs::write(dir.path().join("README.md"), "# readme\n").unwrap();
        fs::write(dir.path().join("src/main.py"), "print('hi')\n").unwrap();
        fs::write(dir.path().join("src/helper.py"), "pass\n").unwrap();
        fs::write(dir.path().join("package.json"), "{}\n").unwrap();
        fs::write(dir.path().join(".hidden"), "secret\n").unwrap();
        fs::write(dir.path().join("node_modules/dep/index.js"), "x\n").unwrap();
        dir
    }

    fn paths(entries: &[FileEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| e.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_walk_honors_builtin_ignores() {
        let dir = project();
        let indexer = FileIndexer::new(dir.path().to_path_buf(), IndexLimits::default());
        let (entries, outcome) = indexer.collect().unwrap();
        let listed = paths(&entries);

        assert!(listed.iter().any(|p| p == "README.md"));
        assert!(listed.iter().any(|p| p.ends_with("main.py")));
        assert!(!listed.iter().any(|p| p.contains("node_modules")));
        assert!(!outcome.truncated);
    }

    #[test]
    fn test_hidden_included_by_default_and_suppressible() {
        let dir = project();

        let with_hidden = FileIndexer::new(dir.path().to_path_buf(), IndexLimits::default())
            .collect()
            .unwrap()
            .0;
        assert!(paths(&with_hidden).iter().any(|p| p == ".hidden"));

        let without = FileIndexer::new(
            dir.path().to_path_buf(),
            IndexLimits {
                include_hidden: false,
                ..IndexLimits::default()
            },
        )
        .collect()
        .unwrap()
        .0;
        assert!(!paths(&without).iter().any(|p| p == ".hidden"));
    }

    #[test]
    fn test_extension_allow_list() {
        let dir = project();
        let indexer = FileIndexer::new(
            dir.path().to_path_buf(),
            IndexLimits {
                extensions: vec!["py".into()],
                ..IndexLimits::default()
            },
        );
        let (entries, _) = indexer.collect().unwrap();
        let listed = paths(&entries);

        assert_eq!(entries.len(), 2);
        assert!(listed.iter().all(|p| p.ends_with(".py")));
    }

    #[test]
    fn test_max_files_cap_marks_truncation() {
        let dir = project();
        let indexer = FileIndexer::new(
            dir.path().to_path_buf(),
            IndexLimits {
                max_files: 2,
                ..IndexLimits::default()
            },
        );
        let (entries, outcome) = indexer.collect().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(outcome.truncated);
    }

    #[test]
    fn test_gitignore_rules_at_root() {
        let dir = project();
        fs::write(dir.path().join(".gitignore"), "*.json\n").unwrap();
        // A .git dir makes the ignore crate treat the root as a repo.
        fs::create_dir_all(dir.path().join(".git")).unwrap();

        let (entries, _) = FileIndexer::new(dir.path().to_path_buf(), IndexLimits::default())
            .collect()
            .unwrap();
        assert!(!paths(&entries).iter().any(|p| p == "package.json"));
    }

    #[test]
    fn test_missing_root_fails() {
        let indexer = FileIndexer::new(PathBuf::from("/nonexistent-gandalf"), IndexLimits::default());
        assert!(indexer.collect().is_err());
    }

    #[test]
    fn test_unscored_listing_is_stable() {
        let dir = project();
        let run = || {
            let (mut entries, _) = FileIndexer::new(dir.path().to_path_buf(), IndexLimits::default())
                .collect()
                .unwrap();
            entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
            paths(&entries)
        };
        assert_eq!(run(), run());
    }
}
