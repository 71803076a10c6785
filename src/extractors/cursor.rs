//! Cursor conversation driver.
//!
//! Cursor persists per-workspace state in
//! `workspaceStorage/<hash>/state.vscdb`, a SQLite database with a
//! two-column `ItemTable` (key, value) where values are JSON blobs. This
//! driver opens each database read-only, runs a fixed set of keyed
//! lookups, and normalizes chat tabs and composer sessions into the
//! common conversation shape. Unknown or drifted schemas are skipped with
//! a warning, never fatal.

use super::{
    lookback_cutoff, normalize_epoch, stat_of, Extractor, QueryOptions, RecallOptions,
    WorkspaceSummary, MAX_MESSAGE_BYTES, MAX_STATE_FILE_BYTES, SCAN_BUDGET_PER_WORKSPACE,
};
use crate::error::{ExtractError, ExtractResult};
use crate::types::{
    Conversation, ConversationMatch, ConversationSummary, SourceTool, WorkspaceRef,
};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};

const PROMPTS_KEY: &str = "aiService.prompts";
const GENERATIONS_KEY: &str = "aiService.generations";
const CHAT_KEY: &str = "workbench.panel.aichat.view.aichat.chatdata";
const COMPOSER_KEY: &str = "composer.composerData";

pub struct CursorExtractor {
    state_dirs: Vec<PathBuf>,
}

impl CursorExtractor {
    #[must_use]
    pub fn new(state_dirs: Vec<PathBuf>) -> Self {
        Self { state_dirs }
    }

    /// Opens one state database read-only, enforcing the size cap.
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

    /// One keyed lookup against `ItemTable`, parsed as JSON. Schema drift
    /// (missing table, missing key, non-JSON value) is a logged skip.
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
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(db = %db_path.display(), key, "Unparseable value: {e}");
                None
            }
        }
    }

    /// Normalizes every conversation in one workspace database.
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

        if let Some(chat) = Self::item(&conn, db_path, CHAT_KEY) {
            for tab in chat["tabs"].as_array().into_iter().flatten() {
                if out.len() >= SCAN_BUDGET_PER_WORKSPACE {
                    return (out, vec![ExtractError::BudgetExhausted {
                        path: db_path.clone(),
                    }]);
                }
                if let Some(conv) = normalize_chat_tab(tab, workspace, with_bodies) {
                    out.push(conv);
                }
            }
        }

        if let Some(composer) = Self::item(&conn, db_path, COMPOSER_KEY) {
            for item in composer["allComposers"].as_array().into_iter().flatten() {
                if out.len() >= SCAN_BUDGET_PER_WORKSPACE {
                    return (out, vec![ExtractError::BudgetExhausted {
                        path: db_path.clone(),
                    }]);
                }
                if let Some(conv) = normalize_composer(item, workspace, with_bodies) {
                    out.push(conv);
                }
            }
        }

        (out, Vec::new())
    }
}

/// Pulls a bounded text body out of a bubble/message value.
fn body_text(value: &Value) -> Option<String> {
    let text = value["text"]
        .as_str()
        .or_else(|| value["richText"].as_str())?;
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

fn normalize_chat_tab(
    tab: &Value,
    workspace: &WorkspaceRef,
    with_bodies: bool,
) -> Option<Conversation> {
    let id = tab["tabId"].as_str()?;
    let bubbles = tab["bubbles"].as_array();
    let title = tab["chatTitle"]
        .as_str()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Chat {id}"));
    let updated_at = tab["lastSendTime"].as_i64().map(normalize_epoch);

    let mut prompts = Vec::new();
    let mut generations = Vec::new();
    let mut message_count = bubbles.map_or(0, Vec::len);

    if with_bodies {
        for bubble in bubbles.into_iter().flatten() {
            let Some(body) = body_text(bubble) else {
                continue;
            };
            match bubble["type"].as_str() {
                Some("user") => prompts.push(body),
                Some("ai") => generations.push(body),
                _ => {}
            }
        }
        if !prompts.is_empty() || !generations.is_empty() {
            message_count = prompts.len() + generations.len();
        }
    }

    Some(Conversation {
        id: id.to_string(),
        source_tool: SourceTool::Cursor,
        workspace_hash: Some(workspace.workspace_hash.clone()),
        title,
        created_at: None,
        updated_at,
        message_count,
        prompts,
        generations,
        metadata: serde_json::Map::new(),
    })
}

fn normalize_composer(
    item: &Value,
    workspace: &WorkspaceRef,
    with_bodies: bool,
) -> Option<Conversation> {
    let id = item["composerId"].as_str()?;
    let messages = item["conversation"].as_array();
    let title = item["name"]
        .as_str()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Composer {id}"));

    let mut prompts = Vec::new();
    let mut generations = Vec::new();
    let mut message_count = messages.map_or(0, Vec::len);

    if with_bodies {
        for msg in messages.into_iter().flatten() {
            let Some(body) = body_text(msg) else { continue };
            // Composer messages use numeric roles: 1 = user, 2 = assistant.
            match msg["type"].as_i64() {
                Some(1) => prompts.push(body),
                Some(2) => generations.push(body),
                _ => {}
            }
        }
        if !prompts.is_empty() || !generations.is_empty() {
            message_count = prompts.len() + generations.len();
        }
    }

    Some(Conversation {
        id: id.to_string(),
        source_tool: SourceTool::Cursor,
        workspace_hash: Some(workspace.workspace_hash.clone()),
        title,
        created_at: item["createdAt"].as_i64().map(normalize_epoch),
        updated_at: item["lastUpdatedAt"].as_i64().map(normalize_epoch),
        message_count,
        prompts,
        generations,
        metadata: serde_json::Map::new(),
    })
}

impl Extractor for CursorExtractor {
    fn tool(&self) -> SourceTool {
        SourceTool::Cursor
    }

    fn list_workspaces(&self) -> ExtractResult<Vec<WorkspaceRef>> {
        if self.state_dirs.is_empty() {
            return Err(ExtractError::StateDirMissing { tool: "cursor" });
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
        let db_path = &workspace.database_path;
        let conn = Self::open_db(db_path)?;

        let prompts = Self::item(&conn, db_path, PROMPTS_KEY)
            .and_then(|v| v.as_array().map(Vec::len))
            .unwrap_or(0);
        let generations = Self::item(&conn, db_path, GENERATIONS_KEY)
            .and_then(|v| v.as_array().map(Vec::len))
            .unwrap_or(0);

        let (conversations, _) = self.conversations(workspace, false);
        let last_updated = conversations
            .iter()
            .filter_map(|c| c.updated_at)
            .max()
            .or(Some(workspace.last_modified));

        Ok(WorkspaceSummary {
            count: conversations.len(),
            last_updated,
            prompts,
            generations,
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

/// Test fixture support: builds a workspace database with the same shape
/// this driver reads.
#[cfg(test)]
pub(crate) fn write_fixture_db(path: &Path, items: &[(&str, &Value)]) {
    let conn = Connection::open(path).expect("fixture db");
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS ItemTable (key TEXT PRIMARY KEY, value BLOB)",
    )
    .expect("fixture schema");
    for (key, value) in items {
        conn.execute(
            "INSERT OR REPLACE INTO ItemTable (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value.to_string()],
        )
        .expect("fixture row");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Epoch seconds "now", so fixtures stay inside lookback windows.
    fn now_secs() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn fixture_workspace(dir: &Path) -> WorkspaceRef {
        let ws_dir = dir.join("abc123def456");
        std::fs::create_dir_all(&ws_dir).unwrap();
        let db = ws_dir.join("state.vscdb");
        let now = now_secs();

        let chatdata = json!({
            "tabs": [
                {
                    "tabId": "tab-1",
                    "chatTitle": "Fix the auth bug",
                    "lastSendTime": (now - 3600) * 1000,
                    "bubbles": [
                        {"type": "user", "text": "why does login fail?"},
                        {"type": "ai", "text": "The token check in auth.rs is inverted."}
                    ]
                },
                {
                    "tabId": "tab-2",
                    "chatTitle": "",
                    "lastSendTime": (now - 7200) * 1000,
                    "bubbles": []
                }
            ]
        });
        let composers = json!({
            "allComposers": [{
                "composerId": "comp-1",
                "name": "Refactor scorer",
                "createdAt": (now - 86_400) * 1000,
                "lastUpdatedAt": (now - 43_200) * 1000,
                "conversation": [
                    {"type": 1, "text": "split the scorer into signals"},
                    {"type": 2, "text": "Done, see scorer.rs"}
                ]
            }]
        });
        let prompts = json!([{"text": "why does login fail?", "commandType": 4}]);
        let generations = json!([{"unixMs": (now - 3600) * 1000, "textDescription": "answered"}]);

        write_fixture_db(
            &db,
            &[
                (CHAT_KEY, &chatdata),
                (COMPOSER_KEY, &composers),
                (PROMPTS_KEY, &prompts),
                (GENERATIONS_KEY, &generations),
            ],
        );

        let (size, last_modified) = stat_of(&db);
        WorkspaceRef {
            workspace_hash: "abc123def456".into(),
            database_path: db,
            size,
            last_modified,
        }
    }

    #[test]
    fn test_list_workspaces() {
        let dir = tempfile::tempdir().unwrap();
        fixture_workspace(dir.path());
        let extractor = CursorExtractor::new(vec![dir.path().to_path_buf()]);
        let workspaces = extractor.list_workspaces().unwrap();
        assert_eq!(workspaces.len(), 1);
        assert_eq!(workspaces[0].workspace_hash, "abc123def456");
        assert!(workspaces[0].size > 0);
    }

    #[test]
    fn test_recall_normalizes_tabs_and_composers() {
        let dir = tempfile::tempdir().unwrap();
        let ws = fixture_workspace(dir.path());
        let extractor = CursorExtractor::new(vec![dir.path().to_path_buf()]);

        let (summaries, errors) = extractor.recall(&ws, &RecallOptions::default());
        assert!(errors.is_empty());
        assert_eq!(summaries.len(), 3);
        // Newest first: the hour-old chat tab.
        assert_eq!(summaries[0].title, "Fix the auth bug");
        assert_eq!(summaries[0].message_count, 2);
        assert!(summaries[0].updated_at.unwrap() > summaries[2].updated_at.unwrap());
        // Untitled tab falls back to a synthesized title.
        assert!(summaries.iter().any(|s| s.title == "Chat tab-2"));
        assert!(summaries.iter().any(|s| s.title == "Refactor scorer"));
    }

    #[test]
    fn test_fast_mode_skips_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let ws = fixture_workspace(dir.path());
        let extractor = CursorExtractor::new(vec![dir.path().to_path_buf()]);

        let opts = RecallOptions {
            fast_mode: true,
            ..RecallOptions::default()
        };
        let (summaries, _) = extractor.recall(&ws, &opts);
        assert!(summaries.iter().all(|s| s.snippet.is_none()));
        // Bubble counts still present without body extraction.
        assert_eq!(summaries[0].message_count, 2);
    }

    #[test]
    fn test_query_title_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let ws = fixture_workspace(dir.path());
        let extractor = CursorExtractor::new(vec![dir.path().to_path_buf()]);

        let (title_hits, _) = extractor.query(
            &ws,
            &QueryOptions {
                query: "AUTH".into(),
                limit: 10,
                include_content: false,
            },
        );
        assert_eq!(title_hits.len(), 1);
        assert_eq!(title_hits[0].matched_in, vec!["title"]);

        let (content_hits, _) = extractor.query(
            &ws,
            &QueryOptions {
                query: "scorer.rs".into(),
                limit: 10,
                include_content: true,
            },
        );
        assert_eq!(content_hits.len(), 1);
        assert!(content_hits[0].matched_in.contains(&"content".to_string()));
        assert!(!content_hits[0].excerpts.is_empty());
    }

    #[test]
    fn test_summarize_counts() {
        let dir = tempfile::tempdir().unwrap();
        let ws = fixture_workspace(dir.path());
        let extractor = CursorExtractor::new(vec![dir.path().to_path_buf()]);

        let summary = extractor.summarize(&ws).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.prompts, 1);
        assert_eq!(summary.generations, 1);
        assert!(summary.last_updated.unwrap() >= now_secs() - 3700);
    }

    #[test]
    fn test_export_message_count_invariant() {
        let dir = tempfile::tempdir().unwrap();
        let ws = fixture_workspace(dir.path());
        let extractor = CursorExtractor::new(vec![dir.path().to_path_buf()]);

        let (conversations, errors) = extractor.export(&ws, None, 100);
        assert!(errors.is_empty());
        for conv in &conversations {
            if !conv.prompts.is_empty() || !conv.generations.is_empty() {
                assert_eq!(
                    conv.message_count,
                    conv.prompts.len() + conv.generations.len()
                );
            }
        }
    }

    #[test]
    fn test_missing_db_is_typed_error_not_panic() {
        let extractor = CursorExtractor::new(vec![PathBuf::from("/nonexistent-gandalf")]);
        let ws = WorkspaceRef {
            workspace_hash: "gone".into(),
            database_path: PathBuf::from("/nonexistent-gandalf/state.vscdb"),
            size: 0,
            last_modified: 0,
        };
        let (summaries, errors) = extractor.recall(&ws, &RecallOptions::default());
        assert!(summaries.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_schema_drift_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ws_dir = dir.path().join("drifted");
        std::fs::create_dir_all(&ws_dir).unwrap();
        let db = ws_dir.join("state.vscdb");
        // A database with a different table entirely.
        let conn = Connection::open(&db).unwrap();
        conn.execute_batch("CREATE TABLE Other (x INTEGER)").unwrap();
        drop(conn);

        let (size, last_modified) = stat_of(&db);
        let ws = WorkspaceRef {
            workspace_hash: "drifted".into(),
            database_path: db,
            size,
            last_modified,
        };
        let extractor = CursorExtractor::new(vec![dir.path().to_path_buf()]);
        let (summaries, errors) = extractor.recall(&ws, &RecallOptions::default());
        // Drift yields empty results and no hard errors.
        assert!(summaries.is_empty());
        assert!(errors.is_empty());
    }
}
