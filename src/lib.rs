//! gandalf: local MCP server for project context and conversation recall.
//!
//! Exposes, to AI coding assistants (Cursor, Claude Code, Windsurf), a
//! uniform view of:
//! - the current project's files ranked by contextual relevance
//! - the developer's prior conversations with those assistants, harvested
//!   from each tool's on-disk state
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              MCP Server (rmcp)              │
//! │         JSON-RPC over stdin/stdout          │
//! └─────────────────┬───────────────────────────┘
//!                   │ raw-params security gate
//! ┌─────────────────▼───────────────────────────┐
//! │               Tool Router                    │
//! │  get_project_info, list_project_files,      │
//! │  recall/search/export conversations, ...     │
//! └───────┬──────────────────────┬───────────────┘
//!         │                      │
//! ┌───────▼────────┐    ┌────────▼───────────────┐
//! │ File pipeline   │    │ Conversation pipeline  │
//! │ indexer → git → │    │ registry → extractors  │
//! │ scorer          │    │ → aggregator           │
//! └───────┬────────┘    └────────┬───────────────┘
//!         │                      │
//!    ┌────▼──────────────────────▼────┐
//!    │   TTL cache (per namespace,     │
//!    │   atomic file persistence)      │
//!    └─────────────────────────────────┘
//! ```

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod extractors;
pub mod fmt;
pub mod project;
pub mod registry;
pub mod security;
pub mod server;
pub mod services;
pub mod tools;
pub mod types;

pub use error::{Result, ServerError};
pub use types::{Conversation, ConversationSummary, Priority, SourceTool};

use std::path::PathBuf;

/// Resolves the gandalf home directory.
///
/// `$GANDALF_HOME` when set, otherwise `${HOME}/.gandalf`. The server's
/// only writes (cache, exports, backups, logs) land beneath this directory.
#[must_use]
pub fn gandalf_home() -> PathBuf {
    if let Some(home) = std::env::var_os("GANDALF_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".gandalf")
}

/// True when the named environment variable holds a truthy value
/// (`1`, `true`, `yes`, `on`, case-insensitive).
#[must_use]
pub fn env_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Writes the informational `installation-state` file under the gandalf
/// home. Best-effort: failures are logged, never fatal.
pub fn write_installation_state(home: &std::path::Path, project_root: &std::path::Path) {
    let body = format!(
        "version={}\npid={}\nstarted_at={}\nproject_root={}\n",
        env!("CARGO_PKG_VERSION"),
        std::process::id(),
        chrono::Utc::now().to_rfc3339(),
        project_root.display(),
    );
    if let Err(e) = std::fs::write(home.join("installation-state"), body) {
        tracing::warn!("Failed to write installation-state: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_truthy() {
        // Use a name no other test touches; env is process-global.
        std::env::set_var("GANDALF_TEST_TRUTHY", "TRUE");
        assert!(env_truthy("GANDALF_TEST_TRUTHY"));
        std::env::set_var("GANDALF_TEST_TRUTHY", "0");
        assert!(!env_truthy("GANDALF_TEST_TRUTHY"));
        std::env::remove_var("GANDALF_TEST_TRUTHY");
        assert!(!env_truthy("GANDALF_TEST_TRUTHY"));
    }
}
