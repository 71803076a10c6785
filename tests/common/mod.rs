//! Common test utilities for gandalf integration tests.
//!
//! Provides `TestEnv` for setting up an isolated gandalf home, a fixture
//! project, and fixture conversation stores for each supported assistant.

#![allow(dead_code)] // Test utilities may not all be used in every test file

use gandalf::aggregator::Aggregator;
use gandalf::cache::Cache;
use gandalf::config::WeightsConfig;
use gandalf::extractors::{ClaudeCodeExtractor, CursorExtractor, Extractor, WindsurfExtractor};
use gandalf::project::ProjectRoot;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A complete test environment: project tree, gandalf home, and fixture
/// assistant state directories.
pub struct TestEnv {
    pub dir: TempDir,
    pub project: ProjectRoot,
    pub cache: Arc<Cache>,
    pub weights: WeightsConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let project_dir = dir.path().join("project");
        std::fs::create_dir_all(&project_dir).expect("Failed to create project dir");

        let cache = Arc::new(Cache::new(dir.path().join("home").join("cache")));

        Self {
            project: ProjectRoot {
                path: project_dir,
                name: "project".into(),
                was_sanitized: false,
            },
            cache,
            weights: WeightsConfig::default(),
            dir,
        }
    }

    /// The gandalf home for this environment.
    pub fn home(&self) -> PathBuf {
        self.dir.path().join("home")
    }

    /// Writes a file into the fixture project.
    pub fn write_project_file(&self, name: &str, content: &str) {
        let path = self.project.path.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&path, content).expect("Failed to write project file");
    }

    /// Root for a fixture Cursor/Windsurf workspaceStorage tree.
    pub fn storage_dir(&self, tool: &str) -> PathBuf {
        let dir = self.dir.path().join(format!("{tool}-storage"));
        std::fs::create_dir_all(&dir).expect("Failed to create storage dir");
        dir
    }

    /// Builds an aggregator over the given extractors, using this
    /// environment's cache.
    pub fn aggregator(&self, extractors: Vec<Box<dyn Extractor>>) -> Aggregator {
        Aggregator::new(Arc::new(extractors), Arc::clone(&self.cache), 300)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Epoch seconds now; fixture timestamps are derived from it so lookback
/// windows always contain them.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Populates the fixture project with the canonical sample tree.
pub fn sample_project(env: &TestEnv) {
    env.write_project_file("README.md", "# there and back again\n");
    env.write_project_file("src/main.py", "from helper import walk\n\nwalk()\n");
    env.write_project_file("src/helper.py", "def walk():\n    return 'to mordor'\n");
    env.write_project_file("tests/test_main.py", "import main\n");
    env.write_project_file("docs/api.md", "# api\n");
    env.write_project_file("package.json", "{\"name\": \"there_and_back_again\"}\n");
}

/// Writes one Cursor-shaped `state.vscdb` workspace and returns its hash.
pub fn cursor_workspace(storage: &Path, hash: &str, chats: &[(&str, &str, i64)]) -> String {
    let ws_dir = storage.join(hash);
    std::fs::create_dir_all(&ws_dir).expect("workspace dir");
    let db = ws_dir.join("state.vscdb");

    let tabs: Vec<serde_json::Value> = chats
        .iter()
        .map(|(id, title, updated_at)| {
            serde_json::json!({
                "tabId": id,
                "chatTitle": title,
                "lastSendTime": updated_at * 1000,
                "bubbles": [
                    {"type": "user", "text": format!("question about {title}")},
                    {"type": "ai", "text": format!("answer about {title}")}
                ]
            })
        })
        .collect();
    let chatdata = serde_json::json!({ "tabs": tabs });
    let prompts = serde_json::json!([{"text": "question", "commandType": 4}]);

    let conn = rusqlite::Connection::open(&db).expect("fixture db");
    conn.execute_batch("CREATE TABLE IF NOT EXISTS ItemTable (key TEXT PRIMARY KEY, value BLOB)")
        .expect("fixture schema");
    for (key, value) in [
        ("workbench.panel.aichat.view.aichat.chatdata", &chatdata),
        ("aiService.prompts", &prompts),
    ] {
        conn.execute(
            "INSERT OR REPLACE INTO ItemTable (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value.to_string()],
        )
        .expect("fixture row");
    }
    hash.to_string()
}

/// Writes one Claude Code session file under an encoded project dir.
pub fn claude_session(
    projects_dir: &Path,
    encoded_project: &str,
    session_id: &str,
    title: &str,
    updated_at: i64,
) {
    let ws_dir = projects_dir.join(encoded_project);
    std::fs::create_dir_all(&ws_dir).expect("claude workspace dir");

    let ts = chrono::DateTime::from_timestamp(updated_at, 0)
        .unwrap()
        .to_rfc3339();
    let lines = [
        serde_json::json!({"type": "summary", "summary": title}).to_string(),
        serde_json::json!({
            "type": "user",
            "timestamp": ts,
            "message": {"role": "user", "content": format!("tell me about {title}")}
        })
        .to_string(),
        serde_json::json!({
            "type": "assistant",
            "timestamp": ts,
            "message": {"role": "assistant", "content": [{"type": "text", "text": "here is what I know"}]}
        })
        .to_string(),
    ]
    .join("\n");
    std::fs::write(ws_dir.join(format!("{session_id}.jsonl")), lines).expect("session file");
}

/// Convenience: extractors over fixture Cursor + Claude Code state.
pub fn fixture_extractors(env: &TestEnv) -> Vec<Box<dyn Extractor>> {
    let now = now_secs();
    let cursor_storage = env.storage_dir("cursor");
    cursor_workspace(
        &cursor_storage,
        "a1b2c3",
        &[
            ("tab-auth", "Fix the auth bug", now - 3600),
            ("tab-cache", "Speed up the cache", now - 7200),
        ],
    );

    let claude_projects = env.dir.path().join("claude-projects");
    std::fs::create_dir_all(&claude_projects).unwrap();
    claude_session(
        &claude_projects,
        "-work-project",
        "sess-1",
        "Plan the refactor",
        now - 1800,
    );

    vec![
        Box::new(CursorExtractor::new(vec![cursor_storage])),
        Box::new(ClaudeCodeExtractor::new(vec![claude_projects])),
    ]
}

/// An extractor set whose windsurf member points at a missing directory,
/// for degraded-source tests.
pub fn with_broken_windsurf(mut extractors: Vec<Box<dyn Extractor>>) -> Vec<Box<dyn Extractor>> {
    extractors.push(Box::new(WindsurfExtractor::new(Vec::new())));
    extractors
}
