//! Conversation extractors.
//!
//! One driver per agentic tool, all conforming to the same capability set:
//! enumerate workspaces, summarize, recall headers, query, and export full
//! conversations. Drivers never abort a request — they return partial
//! results alongside typed errors, and the aggregator merges whatever
//! succeeded.

mod claude;
mod cursor;
mod windsurf;

pub use claude::ClaudeCodeExtractor;
pub use cursor::CursorExtractor;
pub use windsurf::WindsurfExtractor;

use crate::error::{ExtractError, ExtractResult};
use crate::registry::Registry;
use crate::types::{Conversation, ConversationMatch, ConversationSummary, WorkspaceRef};
use std::path::PathBuf;

/// Size cap for any single state file an extractor will open.
pub const MAX_STATE_FILE_BYTES: u64 = 256 * 1024 * 1024;

/// Conversations examined per workspace before a scan gives up.
pub const SCAN_BUDGET_PER_WORKSPACE: usize = 2000;

/// Byte cap on one message body carried into a normalized conversation.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Options for `recall`.
#[derive(Debug, Clone)]
pub struct RecallOptions {
    pub limit: usize,
    pub days_lookback: u64,
    /// Forbids parsing large message bodies; headers only.
    pub fast_mode: bool,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            days_lookback: 30,
            fast_mode: false,
        }
    }
}

/// Options for `query`.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Case-insensitive substring; callers pre-validate length.
    pub query: String,
    pub limit: usize,
    /// Scan message bodies, not just titles.
    pub include_content: bool,
}

/// Read-only aggregate counts for one workspace.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
pub struct WorkspaceSummary {
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
    pub prompts: usize,
    pub generations: usize,
}

/// The capability set every driver implements.
///
/// The aggregator operates on this trait only, never on the tool identity.
pub trait Extractor: Send + Sync {
    fn tool(&self) -> crate::types::SourceTool;

    /// Lightweight workspace enumeration (a directory scan for the
    /// SQLite-backed tools).
    fn list_workspaces(&self) -> ExtractResult<Vec<WorkspaceRef>>;

    /// Read-only aggregate counts.
    fn summarize(&self, workspace: &WorkspaceRef) -> ExtractResult<WorkspaceSummary>;

    /// Conversation headers, newest first.
    fn recall(
        &self,
        workspace: &WorkspaceRef,
        opts: &RecallOptions,
    ) -> (Vec<ConversationSummary>, Vec<ExtractError>);

    /// Case-insensitive substring search over titles and, optionally,
    /// message content, with a hard per-workspace scan budget.
    fn query(
        &self,
        workspace: &WorkspaceRef,
        opts: &QueryOptions,
    ) -> (Vec<ConversationMatch>, Vec<ExtractError>);

    /// Full conversations; only invoked on demand by export.
    fn export(
        &self,
        workspace: &WorkspaceRef,
        filter: Option<&str>,
        limit: usize,
    ) -> (Vec<Conversation>, Vec<ExtractError>);

    /// The `(path, size, mtime)` triples of every state file the extractor
    /// would observe, for cache fingerprinting.
    fn fingerprint_inputs(&self) -> Vec<(PathBuf, u64, i64)>;
}

/// Builds the driver set for every tool the registry detected.
#[must_use]
pub fn build_extractors(registry: &Registry) -> Vec<Box<dyn Extractor>> {
    let mut out: Vec<Box<dyn Extractor>> = Vec::new();
    for tool in registry.detected() {
        match tool.id {
            crate::types::SourceTool::Cursor => {
                out.push(Box::new(CursorExtractor::new(tool.state_dirs.clone())));
            }
            crate::types::SourceTool::ClaudeCode => {
                out.push(Box::new(ClaudeCodeExtractor::new(tool.state_dirs.clone())));
            }
            crate::types::SourceTool::Windsurf => {
                out.push(Box::new(WindsurfExtractor::new(tool.state_dirs.clone())));
            }
        }
    }
    out
}

/// Stat helper shared by the drivers: `(size, mtime)` of a path, zeros on
/// failure.
pub(crate) fn stat_of(path: &std::path::Path) -> (u64, i64) {
    match path.metadata() {
        Ok(meta) => {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs() as i64);
            (meta.len(), mtime)
        }
        Err(_) => (0, 0),
    }
}

/// Directory size and newest mtime, one level of nesting.
pub(crate) fn dir_stat(dir: &std::path::Path) -> (u64, i64) {
    let mut size = 0u64;
    let mut newest = 0i64;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let (s, m) = stat_of(&entry.path());
            size += s;
            newest = newest.max(m);
        }
    }
    (size, newest)
}

/// Title/content substring matcher shared by every driver.
pub(crate) fn match_conversations(
    conversations: &[Conversation],
    opts: &QueryOptions,
) -> Vec<ConversationMatch> {
    let needle = opts.query.to_lowercase();
    let mut out = Vec::new();

    for conv in conversations {
        if out.len() >= opts.limit {
            break;
        }
        let mut matched_in = Vec::new();
        let mut excerpts = Vec::new();

        if conv.title.to_lowercase().contains(&needle) {
            matched_in.push("title".to_string());
        }
        if opts.include_content {
            for body in conv.prompts.iter().chain(&conv.generations) {
                if body.to_lowercase().contains(&needle) {
                    if !matched_in.iter().any(|m| m == "content") {
                        matched_in.push("content".to_string());
                    }
                    if excerpts.len() < 3 {
                        excerpts.push(crate::types::excerpt(body, 200));
                    }
                }
            }
        }

        if !matched_in.is_empty() {
            out.push(ConversationMatch {
                summary: ConversationSummary::from_conversation(conv, false),
                matched_in,
                excerpts,
            });
        }
    }
    out
}

/// Epoch-day cutoff for a lookback window; `None` disables filtering.
pub(crate) fn lookback_cutoff(days: u64) -> Option<i64> {
    if days == 0 {
        return None;
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    Some(now - (days as i64) * 86_400)
}

/// Millisecond-or-second epoch normalization. Tools store both; anything
/// that looks like milliseconds is divided down.
pub(crate) fn normalize_epoch(ts: i64) -> i64 {
    if ts > 100_000_000_000 {
        ts / 1000
    } else {
        ts
    }
}
