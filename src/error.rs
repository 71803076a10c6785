//! Error types for gandalf.
//!
//! Uses thiserror for ergonomic error handling with proper
//! error chain propagation.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level server error.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Security error: {0}")]
    Security(#[from] crate::security::SecurityError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Project root could not be resolved: {0}")]
    ProjectRoot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("{0}")]
    Tool(String),
}

/// Configuration load/validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Cache layer errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Unknown cache namespace: {0}")]
    UnknownNamespace(String),

    #[error("Failed to persist cache entry {key}: {source}")]
    Persist {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Git introspection errors.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("git binary not found")]
    NotInstalled,

    #[error("git {command} timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to spawn git: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Conversation extraction errors.
///
/// Extractors return these alongside partial results; they never abort an
/// aggregation on their own.
#[derive(Error, Debug, Clone)]
pub enum ExtractError {
    #[error("State directory not found for {tool}")]
    StateDirMissing { tool: &'static str },

    #[error("Workspace '{workspace}' not found")]
    WorkspaceNotFound { workspace: String },

    #[error("Failed to open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Query against {path} failed: {reason}")]
    Query { path: PathBuf, reason: String },

    #[error("Skipped {path}: exceeds size cap ({size} bytes)")]
    TooLarge { path: PathBuf, size: u64 },

    #[error("Malformed record in {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Scan budget exhausted in {path}")]
    BudgetExhausted { path: PathBuf },
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Result type alias for extraction operations.
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

// Error code implementations for machine-readable error responses
impl ServerError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Security(e) => e.code(),
            Self::Config(_) => "CONFIG_ERROR",
            Self::Cache(e) => e.code(),
            Self::Git(e) => e.code(),
            Self::Extract(e) => e.code(),
            Self::ProjectRoot(_) => "PROJECT_ROOT",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Tool(_) => "TOOL_ERROR",
        }
    }

    /// True when the caller (the LLM) can fix the error by changing its
    /// input. These surface as tool results with `isError`; everything else
    /// goes down the protocol error channel.
    #[must_use]
    pub fn is_client_fixable(&self) -> bool {
        matches!(
            self,
            Self::Security(_)
                | Self::Tool(_)
                | Self::Timeout { .. }
                | Self::ProjectRoot(_)
                | Self::Extract(_)
        )
    }
}

impl CacheError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownNamespace(_) => "CACHE_NAMESPACE",
            Self::Persist { .. } => "CACHE_PERSIST",
            Self::Corrupt { .. } => "CACHE_CORRUPT",
        }
    }
}

impl GitError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInstalled => "GIT_MISSING",
            Self::Timeout { .. } => "GIT_TIMEOUT",
            Self::CommandFailed { .. } => "GIT_FAILED",
            Self::Spawn(_) => "GIT_SPAWN",
        }
    }
}

impl ExtractError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::StateDirMissing { .. } => "STATE_DIR_MISSING",
            Self::WorkspaceNotFound { .. } => "WORKSPACE_NOT_FOUND",
            Self::Open { .. } => "STORE_OPEN",
            Self::Query { .. } => "STORE_QUERY",
            Self::TooLarge { .. } => "STORE_TOO_LARGE",
            Self::Malformed { .. } => "STORE_MALFORMED",
            Self::BudgetExhausted { .. } => "SCAN_BUDGET",
        }
    }
}

// Conversion to rmcp tool errors
impl From<ServerError> for rmcp::ErrorData {
    fn from(err: ServerError) -> Self {
        rmcp::ErrorData::internal_error(err.to_string(), None)
    }
}
