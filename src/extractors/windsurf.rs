//! Windsurf conversation driver.
//!
//! Windsurf (Codeium's editor) keeps the same VS Code-style
//! `workspaceStorage/<hash>/state.vscdb` layout as Cursor but stores chat
//! sessions under its own keys. The session store has changed shape across
//! releases, so every lookup is wrapped in try/skip and both the map and
//! array forms of the session index are accepted.

use super::{
    lookback_cutoff, normalize_epoch, stat_of, Extractor, QueryOptions, RecallOptions,
    WorkspaceSummary, MAX_MESSAGE_BYTES, MAX_STATE_FILE_BYTES, SCAN_BUDGET_PER_WORKSPACE,
};
use crate::error::{ExtractError, ExtractResult};
use crate::types::{Conversation, ConversationMatch, ConversationSummary, SourceTool, WorkspaceRef};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Session-store keys observed across Windsurf releases, newest first.
const SESSION_KEYS: &[&str] = &[
    "chat.ChatSessionStore.index",
    "windsurf.chatSessionStore",
    "codeium.chatSessions",
];

pub struct WindsurfExtractor {
    state_dirs: Vec<PathBuf>,
}

impl WindsurfExtractor {
    #[must_use]
    pub fn new(state_dirs: Vec<PathBuf>) -> Self {
        Self { state_dirs }
    }

    fn open_db(path: &Path) -> ExtractResult<Connection> {
        let (size, _) = stat_of(path);
        if size > MAX_STATE_FILE_BYTES {
            return Err(ExtractError::TooLarge {
                path: path.to_path_buf(),
                size,
            });
        }
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ExtractError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn item(conn: &Connection, db_path: &Path, key: &str) -> Option<Value> {
        let raw: Option<String> = match conn
            .query_row(
                "SELECT value FROM ItemTable WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(db = %db_path.display(), key, "ItemTable lookup failed: {e}");
                return None;
            }
        };
        serde_json::from_str(&raw?).ok()
    }

    fn conversations(
        &self,
        workspace: &WorkspaceRef,
        with_bodies: bool,
    ) -> (Vec<Conversation>, Vec<ExtractError>) {
        let db_path = &workspace.database_path;
        let conn = match Self::open_db(db_path) {
            Ok(c) => c,
            Err(e) => return (Vec::new(), vec![e]),
        };

        let mut out = Vec::new();
        for key in SESSION_KEYS {
            let Some(store) = Self::item(&conn, db_path, key) else {
                continue;
            };
            for (id, session) in iter_sessions(&store) {
                if out.len() >= SCAN_BUDGET_PER_WORKSPACE {
                    return (out, vec![ExtractError::BudgetExhausted {
                        path: db_path.clone(),
                    }]);
                }
                if let Some(conv) = normalize_session(&id, session, workspace, with_bodies) {
                    out.push(conv);
                }
            }
            if !out.is_empty() {
                break; // first key that yields sessions wins
            }
        }

        (out, Vec::new())
    }
}

/// Accepts both store shapes: `{"sessions": {id: session}}` and
/// `{"sessions": [session-with-id]}` (plus the bare forms of each).
fn iter_sessions(store: &Value) -> Vec<(String, &Value)> {
    let root = store.get("sessions").unwrap_or(store);
    match root {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|s| {
                let id = s["id"]
                    .as_str()
                    .or_else(|| s["sessionId"].as_str())?
                    .to_string();
                Some((id, s))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn session_timestamp(session: &Value, field: &str) -> Option<i64> {
    session[field].as_i64().map(normalize_epoch)
}

fn normalize_session(
    id: &str,
    session: &Value,
    workspace: &WorkspaceRef,
    with_bodies: bool,
) -> Option<Conversation> {
    let messages = session["messages"].as_array();
    let title = session["title"]
        .as_str()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Cascade {id}"));

    let mut prompts = Vec::new();
    let mut generations = Vec::new();
    let mut message_count = messages.map_or(0, Vec::len);

    if with_bodies {
        for msg in messages.into_iter().flatten() {
            let Some(text) = msg["content"].as_str().or_else(|| msg["text"].as_str()) else {
                continue;
            };
            if text.is_empty() {
                continue;
            }
            let mut body = text.to_string();
            if body.len() > MAX_MESSAGE_BYTES {
                let mut cut = MAX_MESSAGE_BYTES;
                while cut > 0 && !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            match msg["role"].as_str() {
                Some("user") => prompts.push(body),
                Some("assistant" | "ai") => generations.push(body),
                _ => {}
            }
        }
        if !prompts.is_empty() || !generations.is_empty() {
            message_count = prompts.len() + generations.len();
        }
    }

    Some(Conversation {
        id: id.to_string(),
        source_tool: SourceTool::Windsurf,
        workspace_hash: Some(workspace.workspace_hash.clone()),
        title,
        created_at: session_timestamp(session, "createdAt"),
        updated_at: session_timestamp(session, "lastUpdatedAt")
            .or_else(|| session_timestamp(session, "timestamp")),
        message_count,
        prompts,
        generations,
        metadata: serde_json::Map::new(),
    })
}

impl Extractor for WindsurfExtractor {
    fn tool(&self) -> SourceTool {
        SourceTool::Windsurf
    }

    fn list_workspaces(&self) -> ExtractResult<Vec<WorkspaceRef>> {
        if self.state_dirs.is_empty() {
            return Err(ExtractError::StateDirMissing { tool: "windsurf" });
        }

        let mut out = Vec::new();
        for dir in &self.state_dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), "Unreadable state dir: {e}");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let ws_dir = entry.path();
                if !ws_dir.is_dir() {
                    continue;
                }
                let db = ws_dir.join("state.vscdb");
                if !db.is_file() {
                    continue;
                }
                let (size, last_modified) = stat_of(&db);
                out.push(WorkspaceRef {
                    workspace_hash: entry.file_name().to_string_lossy().to_string(),
                    database_path: db,
                    size,
                    last_modified,
                });
            }
        }
        out.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(out)
    }

    fn summarize(&self, workspace: &WorkspaceRef) -> ExtractResult<WorkspaceSummary> {
        let (conversations, _) = self.conversations(workspace, true);
        Ok(WorkspaceSummary {
            count: conversations.len(),
            last_updated: conversations
                .iter()
                .filter_map(|c| c.updated_at)
                .max()
                .or(Some(workspace.last_modified)),
            prompts: conversations.iter().map(|c| c.prompts.len()).sum(),
            generations: conversations.iter().map(|c| c.generations.len()).sum(),
        })
    }

    fn recall(
        &self,
        workspace: &WorkspaceRef,
        opts: &RecallOptions,
    ) -> (Vec<ConversationSummary>, Vec<ExtractError>) {
        let (mut conversations, errors) = self.conversations(workspace, !opts.fast_mode);

        if let Some(cutoff) = lookback_cutoff(opts.days_lookback) {
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
        let (conversations, errors) = self.conversations(workspace, opts.include_content);
        let matches = super::match_conversations(&conversations, opts);
        (matches, errors)
    }

    fn export(
        &self,
        workspace: &WorkspaceRef,
        filter: Option<&str>,
        limit: usize,
    ) -> (Vec<Conversation>, Vec<ExtractError>) {
        let (mut conversations, errors) = self.conversations(workspace, true);
        if let Some(filter) = filter {
            let needle = filter.to_lowercase();
            conversations.retain(|c| {
                c.title.to_lowercase().contains(&needle) || c.id.to_lowercase().contains(&needle)
            });
        }
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations.truncate(limit);
        for conv in &mut conversations {
            conv.reconcile_message_count();
        }
        (conversations, errors)
    }

    fn fingerprint_inputs(&self) -> Vec<(PathBuf, u64, i64)> {
        match self.list_workspaces() {
            Ok(workspaces) => workspaces
                .into_iter()
                .map(|w| (w.database_path, w.size, w.last_modified))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::cursor::write_fixture_db;
    use serde_json::json;

    fn now_secs() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn fixture_workspace(dir: &Path, map_shape: bool) -> WorkspaceRef {
        let ws_dir = dir.join("ws-hash-1");
        std::fs::create_dir_all(&ws_dir).unwrap();
        let db = ws_dir.join("state.vscdb");
        let now = now_secs();

        let session = json!({
            "title": "Wire up the cache layer",
            "createdAt": (now - 7200) * 1000,
            "lastUpdatedAt": (now - 600) * 1000,
            "messages": [
                {"role": "user", "content": "add TTL eviction to the cache"},
                {"role": "assistant", "content": "Added TTL checks in cache.rs"}
            ]
        });

        let store = if map_shape {
            json!({"sessions": {"sess-1": session}})
        } else {
            let mut with_id = session.clone();
            with_id["id"] = json!("sess-1");
            json!({"sessions": [with_id]})
        };

        write_fixture_db(&db, &[("chat.ChatSessionStore.index", &store)]);

        let (size, last_modified) = stat_of(&db);
        WorkspaceRef {
            workspace_hash: "ws-hash-1".into(),
            database_path: db,
            size,
            last_modified,
        }
    }

    #[test]
    fn test_recall_map_shape() {
        let dir = tempfile::tempdir().unwrap();
        let ws = fixture_workspace(dir.path(), true);
        let extractor = WindsurfExtractor::new(vec![dir.path().to_path_buf()]);

        let (summaries, errors) = extractor.recall(&ws, &RecallOptions::default());
        assert!(errors.is_empty());
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].title, "Wire up the cache layer");
        assert_eq!(summaries[0].source_tool, SourceTool::Windsurf);
        assert_eq!(summaries[0].message_count, 2);
    }

    #[test]
    fn test_recall_array_shape() {
        let dir = tempfile::tempdir().unwrap();
        let ws = fixture_workspace(dir.path(), false);
        let extractor = WindsurfExtractor::new(vec![dir.path().to_path_buf()]);

        let (summaries, errors) = extractor.recall(&ws, &RecallOptions::default());
        assert!(errors.is_empty());
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, "sess-1");
    }

    #[test]
    fn test_query_content_match() {
        let dir = tempfile::tempdir().unwrap();
        let ws = fixture_workspace(dir.path(), true);
        let extractor = WindsurfExtractor::new(vec![dir.path().to_path_buf()]);

        let (hits, _) = extractor.query(
            &ws,
            &QueryOptions {
                query: "ttl eviction".into(),
                limit: 10,
                include_content: true,
            },
        );
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_unknown_keys_degrade_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ws_dir = dir.path().join("empty-ws");
        std::fs::create_dir_all(&ws_dir).unwrap();
        let db = ws_dir.join("state.vscdb");
        write_fixture_db(&db, &[("some.other.key", &json!({"x": 1}))]);

        let (size, last_modified) = stat_of(&db);
        let ws = WorkspaceRef {
            workspace_hash: "empty-ws".into(),
            database_path: db,
            size,
            last_modified,
        };
        let extractor = WindsurfExtractor::new(vec![dir.path().to_path_buf()]);
        let (summaries, errors) = extractor.recall(&ws, &RecallOptions::default());
        assert!(summaries.is_empty());
        assert!(errors.is_empty());
    }
}
