//! Conversation export tool.
//!
//! Streams full conversations into per-tool files under
//! `GANDALF_HOME/exports/<source_tool>/<conversation_id>.<ext>`. An
//! existing file is first copied into `GANDALF_HOME/backups/` with a
//! timestamp suffix before being overwritten.

use crate::aggregator::{Aggregator, SourceError};
use crate::error::ServerError;
use crate::security;
use crate::types::Conversation;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Export file format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Md,
    Txt,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Md => "md",
            Self::Txt => "txt",
        }
    }
}

/// Input for `export_individual_conversations`.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExportInput {
    /// Output format: json, md, or txt
    pub format: ExportFormat,
    /// Maximum conversations to export (1..=100, default 20)
    #[serde(default)]
    pub limit: Option<i64>,
    /// Substring filter on conversation title or id
    #[serde(default)]
    pub conversation_filter: Option<String>,
    /// Destination directory (default: GANDALF_HOME/exports)
    #[serde(default)]
    pub output_dir: Option<String>,
}

/// Output of `export_individual_conversations`.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ExportOutput {
    pub exported_count: usize,
    pub files: Vec<String>,
    pub output_directory: String,
    pub format: ExportFormat,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SourceError>,
}

/// Executes the `export_individual_conversations` tool.
///
/// # Errors
///
/// Returns a `ServerError` on parameter validation failure or when the
/// destination directory cannot be created. Per-conversation write
/// failures degrade into the output's `errors` array.
pub fn execute_export(
    aggregator: &Aggregator,
    home: &Path,
    input: ExportInput,
) -> crate::error::Result<ExportOutput> {
    let limit = match input.limit {
        None => 20,
        Some(n) => {
            if !(1..=100).contains(&n) {
                return Err(ServerError::Tool(
                    "Limit must be an integer between 1 and 100".into(),
                ));
            }
            n as usize
        }
    };
    if let Some(filter) = &input.conversation_filter {
        security::validate_string("conversation_filter", filter)?;
    }

    let output_root = match &input.output_dir {
        None => home.join("exports"),
        Some(dir) => {
            security::validate_string("output_dir", dir)?;
            let path = PathBuf::from(dir);
            for prefix in security::BLOCKED_PREFIXES {
                if *prefix != "/tmp" && path.starts_with(prefix) {
                    return Err(ServerError::Tool(format!(
                        "Invalid output_dir: '{dir}' is under a blocked system prefix"
                    )));
                }
            }
            path
        }
    };

    let (conversations, mut errors) =
        aggregator.export(input.conversation_filter.as_deref(), limit);

    let mut files = Vec::new();
    for conv in &conversations {
        let dir = output_root.join(conv.source_tool.id());
        if let Err(e) = std::fs::create_dir_all(&dir) {
            return Err(ServerError::Tool(format!(
                "Cannot create export directory '{}': {e}",
                dir.display()
            )));
        }

        let name = format!("{}.{}", sanitize_file_stem(&conv.id), input.format.extension());
        let path = dir.join(&name);

        if path.exists() {
            backup_existing(home, &path, &name);
        }

        let body = render(conv, input.format);
        match std::fs::write(&path, body) {
            Ok(()) => files.push(path.display().to_string()),
            Err(e) => errors.push(SourceError {
                source: conv.source_tool.id().to_string(),
                message: format!("Failed to write {}: {e}", path.display()),
            }),
        }
    }

    Ok(ExportOutput {
        exported_count: files.len(),
        files,
        output_directory: output_root.display().to_string(),
        format: input.format,
        errors,
    })
}

/// Keeps conversation ids filesystem-safe.
fn sanitize_file_stem(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "conversation".into()
    } else {
        cleaned
    }
}

/// Copies an about-to-be-overwritten export into the backups directory.
fn backup_existing(home: &Path, path: &Path, name: &str) {
    let backups = home.join("backups");
    if let Err(e) = std::fs::create_dir_all(&backups) {
        tracing::warn!("Cannot create backups directory: {e}");
        return;
    }
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let target = backups.join(format!("{name}.backup.{stamp}"));
    if let Err(e) = std::fs::copy(path, &target) {
        tracing::warn!(path = %path.display(), "Backup before overwrite failed: {e}");
    }
}

/// Renders one conversation in the requested format.
fn render(conv: &Conversation, format: ExportFormat) -> String {
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(conv).unwrap_or_else(|_| "{}".into())
        }
        ExportFormat::Md => {
            let mut out = String::new();
            let _ = writeln!(out, "# {}", conv.title);
            let _ = writeln!(out);
            let _ = writeln!(out, "- source: {}", conv.source_tool);
            if let Some(ws) = &conv.workspace_hash {
                let _ = writeln!(out, "- workspace: {ws}");
            }
            if let Some(ts) = conv.updated_at {
                let _ = writeln!(out, "- updated_at: {ts}");
            }
            let _ = writeln!(out, "- messages: {}", conv.message_count);
            for (prompt, generation) in interleave(conv) {
                if let Some(p) = prompt {
                    let _ = writeln!(out, "\n## User\n\n{p}");
                }
                if let Some(g) = generation {
                    let _ = writeln!(out, "\n## Assistant\n\n{g}");
                }
            }
            out
        }
        ExportFormat::Txt => {
            let mut out = String::new();
            let _ = writeln!(out, "{} [{}]", conv.title, conv.source_tool);
            for (prompt, generation) in interleave(conv) {
                if let Some(p) = prompt {
                    let _ = writeln!(out, "\n>>> {p}");
                }
                if let Some(g) = generation {
                    let _ = writeln!(out, "\n{g}");
                }
            }
            out
        }
    }
}

/// Pairs prompts with generations positionally for a readable transcript.
fn interleave(conv: &Conversation) -> Vec<(Option<&str>, Option<&str>)> {
    let len = conv.prompts.len().max(conv.generations.len());
    (0..len)
        .map(|i| {
            (
                conv.prompts.get(i).map(String::as_str),
                conv.generations.get(i).map(String::as_str),
            )
        })
        .collect()
}
