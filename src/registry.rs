//! Agentic-tool registry.
//!
//! Detects which AI coding assistants are installed by probing their
//! well-known per-OS state directories, and resolves the directories the
//! conversation extractors read from. Detection runs once at startup; the
//! registry is read-only afterwards.
//!
//! `GANDALF_CURSOR_HOME` / `GANDALF_CLAUDE_HOME` / `GANDALF_WINDSURF_HOME`
//! override the probe roots (unusual installs, integration tests).

use crate::types::SourceTool;
use std::path::{Path, PathBuf};

/// One detected (or probed-and-absent) assistant.
#[derive(Debug, Clone)]
pub struct AgenticTool {
    pub id: SourceTool,
    /// The tool's top-level config directory, when present.
    pub config_dir: Option<PathBuf>,
    /// Directories holding conversation state (workspaceStorage roots for
    /// the SQLite-backed tools, the projects directory for Claude Code).
    pub state_dirs: Vec<PathBuf>,
    pub detected: bool,
}

/// The process-wide registry of assistants.
#[derive(Debug, Clone)]
pub struct Registry {
    tools: Vec<AgenticTool>,
}

impl Registry {
    /// Probes the filesystem for every known tool.
    #[must_use]
    pub fn detect() -> Self {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        let tools = SourceTool::ALL
            .iter()
            .map(|&id| probe_tool(id, &home))
            .collect();
        let registry = Self { tools };
        for tool in &registry.tools {
            tracing::debug!(
                tool = %tool.id,
                detected = tool.detected,
                state_dirs = tool.state_dirs.len(),
                "Probed agentic tool"
            );
        }
        registry
    }

    /// Builds a registry from explicit entries (tests).
    #[must_use]
    pub fn from_tools(tools: Vec<AgenticTool>) -> Self {
        Self { tools }
    }

    /// All probed tools, detected or not.
    #[must_use]
    pub fn tools(&self) -> &[AgenticTool] {
        &self.tools
    }

    /// Only the tools whose state was found on disk.
    pub fn detected(&self) -> impl Iterator<Item = &AgenticTool> {
        self.tools.iter().filter(|t| t.detected)
    }

    /// Looks up one tool's probe result.
    #[must_use]
    pub fn get(&self, id: SourceTool) -> Option<&AgenticTool> {
        self.tools.iter().find(|t| t.id == id)
    }

    /// The identifier downstream code targets when nothing was detected.
    #[must_use]
    pub fn fallback(&self) -> SourceTool {
        self.detected()
            .next()
            .map_or(SourceTool::Cursor, |t| t.id)
    }
}

/// True when a directory contains at least one `*.vscdb` database at any
/// depth ≤ 2 (workspaceStorage/<hash>/state.vscdb).
fn has_vscdb(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "vscdb") {
            return true;
        }
        if path.is_dir() {
            if let Ok(inner) = std::fs::read_dir(&path) {
                for file in inner.flatten() {
                    if file.path().extension().is_some_and(|e| e == "vscdb") {
                        return true;
                    }
                }
            }
        }
    }
    false
}

fn env_override(name: &str) -> Option<PathBuf> {
    std::env::var_os(name).map(PathBuf::from).filter(|p| p.is_dir())
}

fn probe_tool(id: SourceTool, home: &Path) -> AgenticTool {
    match id {
        SourceTool::Cursor => probe_cursor(home),
        SourceTool::ClaudeCode => probe_claude(home),
        SourceTool::Windsurf => probe_windsurf(home),
    }
}

fn probe_cursor(home: &Path) -> AgenticTool {
    if let Some(root) = env_override("GANDALF_CURSOR_HOME") {
        let storage = root.join("workspaceStorage");
        let state_dirs = if storage.is_dir() { vec![storage] } else { vec![root.clone()] };
        let detected = state_dirs.iter().any(|d| has_vscdb(d));
        return AgenticTool {
            id: SourceTool::Cursor,
            config_dir: Some(root),
            state_dirs,
            detected,
        };
    }

    let config_dir = [home.join(".cursor")].into_iter().find(|p| p.is_dir());
    let storage_candidates = [
        home.join("Library/Application Support/Cursor/User/workspaceStorage"),
        home.join(".config/Cursor/User/workspaceStorage"),
    ];
    let state_dirs: Vec<PathBuf> = storage_candidates
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();

    // *.vscdb presence is the strong signal; a bare ~/.cursor still counts
    // as installed but yields no workspaces.
    let detected = state_dirs.iter().any(|d| has_vscdb(d))
        || (!state_dirs.is_empty())
        || config_dir.is_some();

    AgenticTool {
        id: SourceTool::Cursor,
        config_dir,
        state_dirs,
        detected,
    }
}

fn probe_claude(home: &Path) -> AgenticTool {
    let config_dir = env_override("GANDALF_CLAUDE_HOME").or_else(|| {
        [home.join(".claude"), home.join(".config/claude")]
            .into_iter()
            .find(|p| p.is_dir())
    });

    let state_dirs: Vec<PathBuf> = config_dir
        .iter()
        .map(|d| d.join("projects"))
        .filter(|p| p.is_dir())
        .collect();

    AgenticTool {
        id: SourceTool::ClaudeCode,
        detected: config_dir.is_some(),
        config_dir,
        state_dirs,
    }
}

fn probe_windsurf(home: &Path) -> AgenticTool {
    if let Some(root) = env_override("GANDALF_WINDSURF_HOME") {
        let storage = root.join("workspaceStorage");
        let state_dirs = if storage.is_dir() { vec![storage] } else { vec![root.clone()] };
        let detected = state_dirs.iter().any(|d| has_vscdb(d));
        return AgenticTool {
            id: SourceTool::Windsurf,
            config_dir: Some(root),
            state_dirs,
            detected,
        };
    }

    let config_dir = [home.join(".codeium/windsurf")]
        .into_iter()
        .find(|p| p.is_dir());
    let storage_candidates = [
        home.join("Library/Application Support/Windsurf/User/workspaceStorage"),
        home.join(".config/Windsurf/User/workspaceStorage"),
    ];
    let state_dirs: Vec<PathBuf> = storage_candidates
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();

    AgenticTool {
        id: SourceTool::Windsurf,
        detected: config_dir.is_some() || !state_dirs.is_empty(),
        config_dir,
        state_dirs,
    }
}
