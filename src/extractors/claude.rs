//! Claude Code conversation driver.
//!
//! Claude Code stores one JSONL file per session under
//! `~/.claude/projects/<encoded-project-path>/<session-id>.jsonl`. Each
//! line is a typed event: `user` and `assistant` messages, an optional
//! `summary` carrying the session title, and bookkeeping records this
//! driver ignores. Files are streamed line by line with a size cap and a
//! line-count circuit breaker, never slurped whole.

use super::{
    dir_stat, lookback_cutoff, stat_of, Extractor, QueryOptions, RecallOptions, WorkspaceSummary,
    MAX_MESSAGE_BYTES, MAX_STATE_FILE_BYTES, SCAN_BUDGET_PER_WORKSPACE,
};
use crate::error::{ExtractError, ExtractResult};
use crate::types::{
    excerpt, Conversation, ConversationMatch, ConversationSummary, SourceTool, WorkspaceRef,
};
use serde_json::Value;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// Lines scanned per session before the circuit breaker trips.
const MAX_SCAN_LINES: usize = 10_000;

/// Single-line size cap; JSONL lines beyond this are bookkeeping blobs.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

pub struct ClaudeCodeExtractor {
    state_dirs: Vec<PathBuf>,
}

impl ClaudeCodeExtractor {
    #[must_use]
    pub fn new(state_dirs: Vec<PathBuf>) -> Self {
        Self { state_dirs }
    }

    /// Session files in one workspace, newest first.
    fn session_files(workspace: &WorkspaceRef) -> Vec<PathBuf> {
        let mut files: Vec<(PathBuf, i64)> = std::fs::read_dir(&workspace.database_path)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "jsonl"))
            .map(|p| {
                let (_, mtime) = stat_of(&p);
                (p, mtime)
            })
            .collect();
        files.sort_by(|a, b| b.1.cmp(&a.1));
        files.into_iter().map(|(p, _)| p).collect()
    }

    /// Parses every session in a workspace, newest first, stopping at the
    /// per-workspace budget.
    fn conversations(
        &self,
        workspace: &WorkspaceRef,
        with_bodies: bool,
        min_mtime: Option<i64>,
    ) -> (Vec<Conversation>, Vec<ExtractError>) {
        let mut out = Vec::new();
        let mut errors = Vec::new();

        for path in Self::session_files(workspace) {
            if out.len() >= SCAN_BUDGET_PER_WORKSPACE {
                errors.push(ExtractError::BudgetExhausted {
                    path: workspace.database_path.clone(),
                });
                break;
            }
            // mtime pre-filter saves parsing sessions outside the window.
            if let Some(cutoff) = min_mtime {
                let (_, mtime) = stat_of(&path);
                if mtime < cutoff {
                    continue;
                }
            }
            match parse_session(&path, workspace, with_bodies) {
                Ok(Some(conv)) => out.push(conv),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        (out, errors)
    }
}

/// Decodes the project path Claude Code encodes into the workspace
/// directory name: `-Users-foo-myproject` → `/Users/foo/myproject`.
/// Lossy for path segments containing dashes; informational only.
fn decode_project_path(encoded: &str) -> String {
    if let Some(rest) = encoded.strip_prefix('-') {
        format!("/{}", rest.replace('-', "/"))
    } else {
        encoded.replace('-', "/")
    }
}

fn parse_timestamp(value: &Value) -> Option<i64> {
    let raw = value["timestamp"].as_str()?;
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp())
}

/// Extracts plain text from a message's `content`, which is either a
/// string or an array of typed blocks.
fn message_text(message: &Value) -> Option<String> {
    let content = &message["content"];
    let text = if let Some(s) = content.as_str() {
        s.to_string()
    } else {
        let parts: Vec<&str> = content
            .as_array()
            .into_iter()
            .flatten()
            .filter(|block| block["type"].as_str() == Some("text"))
            .filter_map(|block| block["text"].as_str())
            .collect();
        parts.join("\n")
    };
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut body = text.to_string();
    if body.len() > MAX_MESSAGE_BYTES {
        let mut cut = MAX_MESSAGE_BYTES;
        while cut > 0 && !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Some(body)
}

/// Streams one session file into a normalized conversation.
///
/// Returns `Ok(None)` for sessions with no user or assistant messages
/// (bookkeeping-only files).
fn parse_session(
    path: &Path,
    workspace: &WorkspaceRef,
    with_bodies: bool,
) -> ExtractResult<Option<Conversation>> {
    let (size, file_mtime) = stat_of(path);
    if size > MAX_STATE_FILE_BYTES {
        return Err(ExtractError::TooLarge {
            path: path.to_path_buf(),
            size,
        });
    }

    let file = std::fs::File::open(path).map_err(|e| ExtractError::Open {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let reader = std::io::BufReader::new(file);

    let session_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();

    let mut title: Option<String> = None;
    let mut first_user_text: Option<String> = None;
    let mut prompts = Vec::new();
    let mut generations = Vec::new();
    let mut prompt_count = 0usize;
    let mut generation_count = 0usize;
    let mut created_at: Option<i64> = None;
    let mut updated_at: Option<i64> = None;

    for (lineno, line) in reader.lines().enumerate() {
        if lineno >= MAX_SCAN_LINES {
            tracing::warn!(path = %path.display(), "Session scan stopped at line cap");
            break;
        }
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                return Err(ExtractError::Malformed {
                    path: path.to_path_buf(),
                    reason: format!("line {}: {e}", lineno + 1),
                });
            }
        };
        if line.is_empty() || line.len() > MAX_LINE_BYTES {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(&line) else {
            // One bad line does not condemn the session.
            tracing::debug!(path = %path.display(), line = lineno + 1, "Skipping malformed line");
            continue;
        };

        if let Some(ts) = parse_timestamp(&event) {
            created_at.get_or_insert(ts);
            updated_at = Some(ts);
        }

        match event["type"].as_str() {
            Some("summary") => {
                if let Some(s) = event["summary"].as_str() {
                    if !s.is_empty() {
                        title = Some(s.to_string());
                    }
                }
            }
            Some("user") => {
                let text = message_text(&event["message"]);
                if let Some(ref t) = text {
                    prompt_count += 1;
                    if first_user_text.is_none() {
                        first_user_text = Some(excerpt(t, 200));
                    }
                    if with_bodies {
                        prompts.push(t.clone());
                    }
                }
            }
            Some("assistant") => {
                if let Some(t) = message_text(&event["message"]) {
                    generation_count += 1;
                    if with_bodies {
                        generations.push(t);
                    }
                }
            }
            _ => {} // file-history-snapshot and friends
        }
    }

    if prompt_count == 0 && generation_count == 0 {
        return Ok(None);
    }

    let title = title
        .or_else(|| first_user_text.as_deref().map(|t| excerpt(t, 80)))
        .unwrap_or_else(|| format!("Session {session_id}"));

    let mut metadata = serde_json::Map::new();
    metadata.insert(
        "project_path".to_string(),
        Value::String(decode_project_path(&workspace.workspace_hash)),
    );
    // The prompt/generation split survives header-only parses through the
    // metadata, where the bodies themselves are not retained.
    metadata.insert("prompt_count".to_string(), Value::from(prompt_count));
    metadata.insert("generation_count".to_string(), Value::from(generation_count));

    Ok(Some(Conversation {
        id: session_id,
        source_tool: SourceTool::ClaudeCode,
        workspace_hash: Some(workspace.workspace_hash.clone()),
        title,
        created_at,
        updated_at: updated_at.or(Some(file_mtime)),
        message_count: prompt_count + generation_count,
        prompts,
        generations,
        metadata,
    }))
}

impl Extractor for ClaudeCodeExtractor {
    fn tool(&self) -> SourceTool {
        SourceTool::ClaudeCode
    }

    fn list_workspaces(&self) -> ExtractResult<Vec<WorkspaceRef>> {
        if self.state_dirs.is_empty() {
            return Err(ExtractError::StateDirMissing { tool: "claude_code" });
        }

        let mut out = Vec::new();
        for dir in &self.state_dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), "Unreadable projects dir: {e}");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let (size, last_modified) = dir_stat(&path);
                out.push(WorkspaceRef {
                    workspace_hash: entry.file_name().to_string_lossy().to_string(),
                    database_path: path,
                    size,
                    last_modified,
                });
            }
        }
        out.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(out)
    }

    fn summarize(&self, workspace: &WorkspaceRef) -> ExtractResult<WorkspaceSummary> {
        let (conversations, _) = self.conversations(workspace, false, None);
        let meta_count = |c: &Conversation, key: &str| {
            c.metadata.get(key).and_then(Value::as_u64).unwrap_or(0) as usize
        };
        Ok(WorkspaceSummary {
            count: conversations.len(),
            last_updated: conversations.iter().filter_map(|c| c.updated_at).max(),
            prompts: conversations.iter().map(|c| meta_count(c, "prompt_count")).sum(),
            generations: conversations
                .iter()
                .map(|c| meta_count(c, "generation_count"))
                .sum(),
        })
    }

    fn recall(
        &self,
        workspace: &WorkspaceRef,
        opts: &RecallOptions,
    ) -> (Vec<ConversationSummary>, Vec<ExtractError>) {
        let cutoff = lookback_cutoff(opts.days_lookback);
        let (mut conversations, errors) =
            self.conversations(workspace, !opts.fast_mode, cutoff);

        if let Some(cutoff) = cutoff {
            conversations.retain(|c| c.updated_at.is_none_or(|ts| ts >= cutoff));
        }
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations.truncate(opts.limit);

        let summaries = conversations
            .iter()
            .map(|c| ConversationSummary::from_conversation(c, !opts.fast_mode))
            .collect();
        (summaries, errors)
    }

    fn query(
        &self,
        workspace: &WorkspaceRef,
        opts: &QueryOptions,
    ) -> (Vec<ConversationMatch>, Vec<ExtractError>) {
        let (conversations, errors) =
            self.conversations(workspace, opts.include_content, None);
        let matches = super::match_conversations(&conversations, opts);
        (matches, errors)
    }

    fn export(
        &self,
        workspace: &WorkspaceRef,
        filter: Option<&str>,
        limit: usize,
    ) -> (Vec<Conversation>, Vec<ExtractError>) {
        let (mut conversations, errors) = self.conversations(workspace, true, None);
        if let Some(filter) = filter {
            let needle = filter.to_lowercase();
            conversations.retain(|c| {
                c.title.to_lowercase().contains(&needle) || c.id.to_lowercase().contains(&needle)
            });
        }
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations.truncate(limit);
        (conversations, errors)
    }

    fn fingerprint_inputs(&self) -> Vec<(PathBuf, u64, i64)> {
        let mut out = Vec::new();
        if let Ok(workspaces) = self.list_workspaces() {
            for ws in workspaces {
                for file in Self::session_files(&ws) {
                    let (size, mtime) = stat_of(&file);
                    out.push((file, size, mtime));
                }
            }
        }
        out
    }
}
