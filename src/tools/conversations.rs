//! Conversation recall/search MCP tools.

use crate::aggregator::{Aggregator, SourceError};
use crate::config::WeightsConfig;
use crate::error::ServerError;
use crate::extractors::{Extractor, QueryOptions, RecallOptions};
use crate::security;
use crate::types::{ConversationMatch, ConversationSummary, SourceTool, WorkspaceRef};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Output of the per-tool workspace listing tools.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ListWorkspacesOutput {
    pub workspaces: Vec<WorkspaceRef>,
    pub total_workspaces: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SourceError>,
}

/// Executes a `list_<tool>_workspaces` tool.
///
/// # Errors
///
/// Returns a `ServerError::Tool` when the tool is not installed at all;
/// an installed tool with no workspaces returns an empty listing.
pub fn execute_list_workspaces(
    extractors: &[Box<dyn Extractor>],
    tool: SourceTool,
) -> crate::error::Result<ListWorkspacesOutput> {
    let Some(extractor) = extractors.iter().find(|e| e.tool() == tool) else {
        return Err(ServerError::Tool(format!(
            "{} is not installed on this machine (no state directory found)",
            tool.id()
        )));
    };

    match extractor.list_workspaces() {
        Ok(workspaces) => Ok(ListWorkspacesOutput {
            total_workspaces: workspaces.len(),
            workspaces,
            errors: Vec::new(),
        }),
        Err(e) => Ok(ListWorkspacesOutput {
            workspaces: Vec::new(),
            total_workspaces: 0,
            errors: vec![SourceError {
                source: tool.id().to_string(),
                message: e.to_string(),
            }],
        }),
    }
}

/// Input for `recall_conversations`.
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RecallInput {
    /// Skip message bodies for speed; headers only
    #[serde(default)]
    pub fast_mode: bool,
    /// Only conversations updated within this many days (0 = all)
    #[serde(default)]
    pub days_lookback: Option<i64>,
    /// Maximum conversations to return (1..=1000)
    #[serde(default)]
    pub limit: Option<i64>,
    /// Substring filter on the workspace hash
    #[serde(default)]
    pub workspace_filter: Option<String>,
}

/// Echo of the effective recall parameters.
#[derive(Debug, Serialize, JsonSchema)]
pub struct RecallParameters {
    pub limit: usize,
    pub days_lookback: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_filter: Option<String>,
}

/// Output of `recall_conversations`.
#[derive(Debug, Serialize, JsonSchema)]
pub struct RecallOutput {
    /// "fast" or "full".
    pub mode: String,
    pub total_conversations: usize,
    pub parameters: RecallParameters,
    pub conversations: Vec<ConversationSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SourceError>,
    pub processed_workspaces: usize,
}

/// Executes the `recall_conversations` tool.
///
/// # Errors
///
/// Returns a `ServerError` on parameter validation failure. Per-source
/// extraction failures degrade into the output's `errors` array instead.
pub fn execute_recall(
    aggregator: &Aggregator,
    weights: &WeightsConfig,
    input: RecallInput,
) -> crate::error::Result<RecallOutput> {
    let limit = match input.limit {
        None => 50,
        Some(n) => {
            security::validate_int_range("limit", n, 1, 1000)?;
            n as usize
        }
    };
    let days_lookback = match input.days_lookback {
        None => weights.days_lookback,
        Some(n) => {
            security::validate_int_range("days_lookback", n, 0, 3650)?;
            n as u64
        }
    };
    if let Some(filter) = &input.workspace_filter {
        security::validate_string("workspace_filter", filter)?;
    }

    let opts = RecallOptions {
        limit,
        days_lookback,
        fast_mode: input.fast_mode,
    };
    let result = aggregator.recall(&opts, input.workspace_filter.as_deref());

    Ok(RecallOutput {
        mode: if input.fast_mode { "fast" } else { "full" }.to_string(),
        total_conversations: result.conversations.len(),
        parameters: RecallParameters {
            limit,
            days_lookback,
            workspace_filter: input.workspace_filter,
        },
        conversations: result.conversations,
        errors: result.errors,
        processed_workspaces: result.processed_workspaces,
    })
}

/// Requested rendering of the search result.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    #[default]
    Json,
    Markdown,
    /// Cursor-flavored compact listing.
    Cursor,
}

/// Input for `search_conversations`.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchInput {
    /// Case-insensitive substring to find
    pub query: String,
    /// Maximum matches to return (default: 20)
    #[serde(default)]
    pub limit: Option<i64>,
    /// Also scan message bodies, not just titles
    #[serde(default)]
    pub include_content: bool,
    /// Result rendering: json (default), markdown, or cursor
    #[serde(default)]
    pub format: TextFormat,
}

/// Output of `search_conversations`.
#[derive(Debug, Serialize, JsonSchema)]
pub struct SearchOutput {
    pub query: String,
    pub total_matches: usize,
    pub processed_conversations: usize,
    pub conversations: Vec<ConversationMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SourceError>,
    #[serde(skip)]
    pub format: TextFormat,
}

/// Executes the `search_conversations` tool.
///
/// # Errors
///
/// Returns a `ServerError` on parameter validation failure.
pub fn execute_search(
    aggregator: &Aggregator,
    input: SearchInput,
) -> crate::error::Result<SearchOutput> {
    security::validate_query(&input.query)?;
    let limit = match input.limit {
        None => 20,
        Some(n) => {
            security::validate_int_range("limit", n, 1, 500)?;
            n as usize
        }
    };

    let result = aggregator.search(&QueryOptions {
        query: input.query.clone(),
        limit,
        include_content: input.include_content,
    });

    Ok(SearchOutput {
        query: input.query,
        total_matches: result.matches.len(),
        processed_conversations: result.processed_conversations,
        conversations: result.matches,
        errors: result.errors,
        format: input.format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;

    fn empty_setup() -> (tempfile::TempDir, std::sync::Arc<Cache>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = std::sync::Arc::new(Cache::new(dir.path().join("cache")));
        (dir, cache)
    }

    #[test]
    fn test_list_workspaces_unknown_tool_errors() {
        let extractors: Vec<Box<dyn Extractor>> = Vec::new();
        let err = execute_list_workspaces(&extractors, SourceTool::Cursor).unwrap_err();
        assert!(err.to_string().contains("not installed"));
    }

    #[test]
    fn test_recall_limit_bounds() {
        let (_dir, cache) = empty_setup();
        let extractors: Vec<Box<dyn Extractor>> = Vec::new();
        let aggregator = Aggregator::new(std::sync::Arc::new(extractors), cache.clone(), 300);
        let weights = WeightsConfig::default();

        let err = execute_recall(
            &aggregator,
            &weights,
            RecallInput {
                limit: Some(1001),
                ..RecallInput::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("between 1 and 1000"));

        let ok = execute_recall(&aggregator, &weights, RecallInput::default()).unwrap();
        assert_eq!(ok.total_conversations, 0);
        assert_eq!(ok.mode, "full");
    }

    #[test]
    fn test_search_query_validation() {
        let (_dir, cache) = empty_setup();
        let extractors: Vec<Box<dyn Extractor>> = Vec::new();
        let aggregator = Aggregator::new(std::sync::Arc::new(extractors), cache.clone(), 300);

        let err = execute_search(
            &aggregator,
            SearchInput {
                query: String::new(),
                limit: None,
                include_content: false,
                format: TextFormat::Json,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("query"));

        let err = execute_search(
            &aggregator,
            SearchInput {
                query: "q".repeat(security::MAX_QUERY_LENGTH + 1),
                limit: None,
                include_content: false,
                format: TextFormat::Json,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("maximum length"));
    }
}
