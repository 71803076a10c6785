//! Project file listing with optional relevance scoring.

use crate::cache::Cache;
use crate::config::WeightsConfig;
use crate::error::ServerError;
use crate::project::ProjectRoot;
use crate::security;
use crate::services::git::GitTracker;
use crate::services::indexer::{FileIndexer, IndexLimits};
use crate::services::scorer::{score_files, ScoringContext};
use crate::types::Priority;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Input for the `list_project_files` tool.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListFilesInput {
    /// Extension filters, e.g. [".py", "rs"] (empty = all files)
    #[serde(default)]
    pub file_types: Vec<String>,
    /// Maximum files to return (1..=configured cap)
    #[serde(default)]
    pub max_files: Option<i64>,
    /// Rank files by relevance and group by priority (default: true)
    #[serde(default = "default_true")]
    pub use_relevance_scoring: bool,
    /// Include hidden files (default: true)
    #[serde(default = "default_true")]
    pub include_hidden: bool,
}

const fn default_true() -> bool {
    true
}

/// One scored file in the output.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ScoredFileOutput {
    pub path: String,
    pub score: f64,
    pub priority: Priority,
    /// Signal name → contribution.
    pub contributing_signals: std::collections::BTreeMap<String, f64>,
}

/// Files grouped by priority tier.
#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct PriorityGroups {
    pub high: Vec<ScoredFileOutput>,
    pub medium: Vec<ScoredFileOutput>,
    pub low: Vec<ScoredFileOutput>,
}

/// Output of the `list_project_files` tool.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ListFilesOutput {
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priorities: Option<PriorityGroups>,
    pub total_files: usize,
    pub truncated: bool,
}

/// Executes the `list_project_files` tool.
///
/// `conversation_text` is the lowercased corpus of cached conversation
/// titles and snippets, used for the mention signal; pass an empty string
/// to disable it.
///
/// # Errors
///
/// Returns a `ServerError` on parameter validation failure or a walk
/// failure at the project root.
pub fn execute_list_files(
    root: &ProjectRoot,
    cache: &Cache,
    weights: &WeightsConfig,
    conversation_text: &str,
    input: ListFilesInput,
) -> crate::error::Result<ListFilesOutput> {
    // Parameter gates
    security::validate_array_len("file_types", &input.file_types)?;
    let mut extensions = Vec::with_capacity(input.file_types.len());
    for raw in &input.file_types {
        extensions.push(security::validate_extension(raw)?);
    }

    let max_files = match input.max_files {
        None => weights.max_files_per_listing,
        Some(n) => {
            if n < 1 {
                return Err(ServerError::Tool("Invalid max_files: must be ≥ 1".into()));
            }
            security::validate_int_range(
                "max_files",
                n,
                1,
                weights.max_files_per_listing as i64,
            )?;
            n as usize
        }
    };

    let indexer = FileIndexer::new(
        root.path.clone(),
        IndexLimits {
            max_files,
            include_hidden: input.include_hidden,
            extensions,
        },
    );
    let (entries, outcome) = indexer.collect()?;

    if !input.use_relevance_scoring {
        let mut files: Vec<String> = entries
            .iter()
            .map(|e| e.relative_path.to_string_lossy().to_string())
            .collect();
        files.sort();
        return Ok(ListFilesOutput {
            total_files: files.len(),
            files,
            priorities: None,
            truncated: outcome.truncated,
        });
    }

    let tracker = GitTracker::new(&root.path, cache, weights.git_timeout, weights.git_cache_ttl);
    let recent = tracker.recent_files(weights.git_lookback_days);
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let scored = score_files(
        entries,
        &ScoringContext {
            weights,
            now,
            recent_files: &recent,
            conversation_text,
            root: &root.path,
        },
    );

    let mut groups = PriorityGroups::default();
    let mut files = Vec::with_capacity(scored.len());
    for file in &scored {
        let out = ScoredFileOutput {
            path: file.entry.relative_path.to_string_lossy().to_string(),
            score: (file.score * 100.0).round() / 100.0,
            priority: file.priority,
            contributing_signals: file
                .contributing_signals
                .iter()
                .map(|(k, v)| ((*k).to_string(), (v * 100.0).round() / 100.0))
                .collect(),
        };
        files.push(out.path.clone());
        match file.priority {
            Priority::High => groups.high.push(out),
            Priority::Medium => groups.medium.push(out),
            Priority::Low => groups.low.push(out),
        }
    }

    Ok(ListFilesOutput {
        total_files: files.len(),
        files,
        priorities: Some(groups),
        truncated: outcome.truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, ProjectRoot, Cache, WeightsConfig) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("tests")).unwrap();
        std::fs::write(dir.path().join("src/main.py"), "import helper\n").unwrap();
        std::fs::write(dir.path().join("src/helper.py"), "pass\n").unwrap();
        std::fs::write(dir.path().join("tests/test_main.py"), "import main\n").unwrap();
        std::fs::write(dir.path().join("package.json"), "{}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# readme\n").unwrap();

        let root = ProjectRoot {
            path: dir.path().to_path_buf(),
            name: "fixture".into(),
            was_sanitized: false,
        };
        let cache = Cache::new(dir.path().join(".cache"));
        (dir, root, cache, WeightsConfig::default())
    }

    fn input() -> ListFilesInput {
        ListFilesInput {
            file_types: Vec::new(),
            max_files: None,
            use_relevance_scoring: true,
            include_hidden: true,
        }
    }

    #[test]
    fn test_filtered_listing() {
        let (_dir, root, cache, weights) = fixture();
        let out = execute_list_files(
            &root,
            &cache,
            &weights,
            "",
            ListFilesInput {
                file_types: vec![".py".into()],
                ..input()
            },
        )
        .unwrap();

        assert!(out.files.iter().any(|f| f.ends_with("main.py")));
        assert!(out.files.iter().any(|f| f.ends_with("helper.py")));
        assert!(out.files.iter().any(|f| f.ends_with("test_main.py")));
        assert!(!out.files.iter().any(|f| f.contains("package.json")));
        assert!(!out.files.iter().any(|f| f.contains("README")));
    }

    #[test]
    fn test_scoring_produces_priority_groups() {
        let (_dir, root, cache, weights) = fixture();
        let out = execute_list_files(&root, &cache, &weights, "", input()).unwrap();
        let groups = out.priorities.expect("scored listing has groups");
        let grouped = groups.high.len() + groups.medium.len() + groups.low.len();
        assert_eq!(grouped, out.total_files);
    }

    #[test]
    fn test_unscored_listing_is_sorted_and_flat() {
        let (_dir, root, cache, weights) = fixture();
        let out = execute_list_files(
            &root,
            &cache,
            &weights,
            "",
            ListFilesInput {
                use_relevance_scoring: false,
                ..input()
            },
        )
        .unwrap();
        assert!(out.priorities.is_none());
        let mut sorted = out.files.clone();
        sorted.sort();
        assert_eq!(out.files, sorted);
    }

    #[test]
    fn test_max_files_zero_rejected() {
        let (_dir, root, cache, weights) = fixture();
        let err = execute_list_files(
            &root,
            &cache,
            &weights,
            "",
            ListFilesInput {
                max_files: Some(0),
                ..input()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be ≥ 1"));
    }

    #[test]
    fn test_bad_extension_rejected() {
        let (_dir, root, cache, weights) = fixture();
        let err = execute_list_files(
            &root,
            &cache,
            &weights,
            "",
            ListFilesInput {
                file_types: vec!["../../../etc/passwd".into()],
                ..input()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid file extension"));
    }

    #[test]
    fn test_oversized_file_types_array_rejected() {
        let (_dir, root, cache, weights) = fixture();
        let err = execute_list_files(
            &root,
            &cache,
            &weights,
            "",
            ListFilesInput {
                file_types: (0..security::MAX_ARRAY_LENGTH + 1)
                    .map(|_| ".py".to_string())
                    .collect(),
                ..input()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("array exceeds maximum length"));
    }

    #[test]
    fn test_conversation_mention_boosts_file() {
        let (_dir, root, cache, weights) = fixture();
        let out = execute_list_files(
            &root,
            &cache,
            &weights,
            "we should rewrite helper.py soon",
            input(),
        )
        .unwrap();
        let groups = out.priorities.unwrap();
        let all: Vec<&ScoredFileOutput> = groups
            .high
            .iter()
            .chain(&groups.medium)
            .chain(&groups.low)
            .collect();
        let helper = all
            .iter()
            .find(|f| f.path.ends_with("helper.py"))
            .expect("helper.py listed");
        assert!(helper.contributing_signals.contains_key("conversation_mention"));
    }
}
