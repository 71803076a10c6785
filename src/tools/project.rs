//! Project-info MCP tool.

use crate::cache::Cache;
use crate::config::WeightsConfig;
use crate::project::ProjectRoot;
use crate::services::git::{GitInfo, GitTracker};
use crate::services::indexer::{FileIndexer, IndexLimits};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Input for the `get_project_info` tool.
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProjectInfoInput {
    /// Include file counts grouped by extension (walks the project)
    #[serde(default)]
    pub include_stats: bool,
}

/// File statistics over the project tree.
#[derive(Debug, Serialize, JsonSchema)]
pub struct FileStats {
    pub total_files: usize,
    /// Extension (no dot) → count; extensionless files appear under "".
    pub by_extension: BTreeMap<String, usize>,
}

/// Output of the `get_project_info` tool.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ProjectInfoOutput {
    pub project_name: String,
    pub project_root: String,
    pub was_sanitized: bool,
    pub is_git_repo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_stats: Option<FileStats>,
}

/// Executes the `get_project_info` tool.
///
/// # Errors
///
/// Returns a `ServerError` when stats collection fails at the project
/// root; git being absent is not an error.
pub fn execute_project_info(
    root: &ProjectRoot,
    cache: &Cache,
    weights: &WeightsConfig,
    input: ProjectInfoInput,
) -> crate::error::Result<ProjectInfoOutput> {
    let tracker = GitTracker::new(&root.path, cache, weights.git_timeout, weights.git_cache_ttl);
    let git = tracker.info();

    let file_stats = if input.include_stats {
        let indexer = FileIndexer::new(
            root.path.clone(),
            IndexLimits {
                max_files: weights.max_files_per_listing,
                ..IndexLimits::default()
            },
        );
        let (entries, _) = indexer.collect()?;
        let mut by_extension: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &entries {
            let key = entry.extension.clone().unwrap_or_default();
            *by_extension.entry(key).or_default() += 1;
        }
        Some(FileStats {
            total_files: entries.len(),
            by_extension,
        })
    } else {
        None
    };

    Ok(ProjectInfoOutput {
        project_name: root.name.clone(),
        project_root: root.path.display().to_string(),
        was_sanitized: root.was_sanitized,
        is_git_repo: git.is_some(),
        git,
        file_stats,
    })
}
