//! Core domain types for gandalf.
//!
//! Everything that crosses a component boundary lives here: file entries
//! produced by the indexer, scored files produced by the scorer, and the
//! normalized conversation shape shared by every extractor.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The agentic tools whose on-disk state gandalf can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceTool {
    Cursor,
    ClaudeCode,
    Windsurf,
}

impl SourceTool {
    /// All known tools, in registry probe order.
    pub const ALL: [Self; 3] = [Self::Cursor, Self::ClaudeCode, Self::Windsurf];

    /// Stable identifier used in cache keys and export paths.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Cursor => "cursor",
            Self::ClaudeCode => "claude_code",
            Self::Windsurf => "windsurf",
        }
    }
}

impl fmt::Display for SourceTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for SourceTool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cursor" => Ok(Self::Cursor),
            "claude_code" | "claude-code" | "claude" => Ok(Self::ClaudeCode),
            "windsurf" => Ok(Self::Windsurf),
            other => Err(format!(
                "Unknown source tool: '{}'. Valid tools: cursor, claude_code, windsurf",
                other
            )),
        }
    }
}

/// Relevance tier derived from a file's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// One file observed during project indexing.
///
/// `relative_path` is always relative to the resolved project root; the
/// indexer guarantees it cannot escape the root after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub relative_path: PathBuf,
    pub size_bytes: u64,
    /// Seconds since the Unix epoch.
    pub mtime: i64,
    /// Lowercased extension without the leading dot, if any.
    pub extension: Option<String>,
    /// Directory components of `relative_path`, root-first.
    pub directory_segments: Vec<String>,
}

impl FileEntry {
    /// File name portion of the relative path.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.relative_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
    }
}

/// A file with its computed relevance score and tier.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredFile {
    #[serde(flatten)]
    pub entry: FileEntry,
    pub score: f64,
    pub priority: Priority,
    /// Per-signal contributions, for transparency in tool output.
    pub contributing_signals: ahash::AHashMap<&'static str, f64>,
}

/// Lightweight reference to one workspace inside a tool's state directory.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkspaceRef {
    /// Hash-like workspace identifier (directory name for SQLite stores,
    /// encoded project path for Claude Code).
    pub workspace_hash: String,
    /// Path to the backing store (a `state.vscdb` file or a session directory).
    pub database_path: PathBuf,
    /// Approximate on-disk size in bytes.
    pub size: u64,
    /// Seconds since the Unix epoch of the most recent modification.
    pub last_modified: i64,
}

/// Normalized conversation, regardless of which tool produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Native identifier within the source tool.
    pub id: String,
    pub source_tool: SourceTool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_hash: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    pub message_count: usize,
    pub prompts: Vec<String>,
    pub generations: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Conversation {
    /// Dedup key across extractors.
    #[must_use]
    pub fn dedup_key(&self) -> (SourceTool, &str) {
        (self.source_tool, &self.id)
    }

    /// Recomputes `message_count` from the populated message arrays.
    ///
    /// Callers that fill both `prompts` and `generations` must keep the
    /// count equal to the sum of their lengths.
    pub fn reconcile_message_count(&mut self) {
        if !self.prompts.is_empty() || !self.generations.is_empty() {
            self.message_count = self.prompts.len() + self.generations.len();
        }
    }
}

/// Conversation header returned by `recall` and cached in per-tool indexes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConversationSummary {
    pub id: String,
    pub source_tool: SourceTool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_hash: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    pub message_count: usize,
    /// First prompt excerpt; absent in fast mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl ConversationSummary {
    /// Builds a summary header from a full conversation.
    #[must_use]
    pub fn from_conversation(conv: &Conversation, snippet: bool) -> Self {
        Self {
            id: conv.id.clone(),
            source_tool: conv.source_tool,
            workspace_hash: conv.workspace_hash.clone(),
            title: conv.title.clone(),
            created_at: conv.created_at,
            updated_at: conv.updated_at,
            message_count: conv.message_count,
            snippet: if snippet {
                conv.prompts.first().map(|p| excerpt(p, 200))
            } else {
                None
            },
        }
    }
}

/// A search hit: the summary plus where the query matched.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConversationMatch {
    #[serde(flatten)]
    pub summary: ConversationSummary,
    /// Which fields matched: "title" and/or "content".
    pub matched_in: Vec<String>,
    /// Matching message excerpts, present when content was requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excerpts: Vec<String>,
}

/// Truncates to at most `max_chars` characters on a char boundary.
#[must_use]
pub fn excerpt(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.trim().to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

// Compile-time assertions for thread safety.
// These ensure Send+Sync remain implemented and catch regressions.
#[cfg(test)]
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}

    assert_send_sync::<SourceTool>();
    assert_send_sync::<FileEntry>();
    assert_send_sync::<ScoredFile>();
    assert_send_sync::<Conversation>();
};

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(prompts: usize, generations: usize) -> Conversation {
        Conversation {
            id: "conv-1".into(),
            source_tool: SourceTool::Cursor,
            workspace_hash: None,
            title: "test".into(),
            created_at: Some(1_700_000_000),
            updated_at: Some(1_700_000_100),
            message_count: 0,
            prompts: (0..prompts).map(|i| format!("prompt {i}")).collect(),
            generations: (0..generations).map(|i| format!("gen {i}")).collect(),
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_message_count_invariant() {
        let mut conv = conversation(3, 2);
        conv.reconcile_message_count();
        assert_eq!(conv.message_count, conv.prompts.len() + conv.generations.len());
    }

    #[test]
    fn test_reconcile_keeps_header_count_when_bodies_absent() {
        let mut conv = conversation(0, 0);
        conv.message_count = 42; // header-only recall keeps the store's count
        conv.reconcile_message_count();
        assert_eq!(conv.message_count, 42);
    }

    #[test]
    fn test_source_tool_parse() {
        assert_eq!("cursor".parse::<SourceTool>().unwrap(), SourceTool::Cursor);
        assert_eq!(
            "claude-code".parse::<SourceTool>().unwrap(),
            SourceTool::ClaudeCode
        );
        assert!("emacs".parse::<SourceTool>().is_err());
    }

    #[test]
    fn test_excerpt_truncation() {
        assert_eq!(excerpt("short", 10), "short");
        let long = "x".repeat(300);
        let e = excerpt(&long, 200);
        assert!(e.chars().count() <= 201); // 200 + ellipsis
        assert!(e.ends_with('…'));
    }

    #[test]
    fn test_excerpt_multibyte() {
        let s = "héllo wörld ".repeat(40);
        let e = excerpt(&s, 50);
        assert!(e.chars().count() <= 51);
    }
}
