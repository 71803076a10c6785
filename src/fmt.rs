//! Output formatters.
//!
//! `render_*` functions produce the markdown/cursor text bodies selectable
//! via the `format` tool parameter; `fmt_*` functions format tool output
//! for terminal display in CLI mode. When `color` is true, ANSI escape
//! codes are emitted via `owo_colors`.

use crate::tools::{ListFilesOutput, ProjectInfoOutput, RecallOutput, SearchOutput};
use owo_colors::OwoColorize;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Epoch seconds → `YYYY-MM-DD HH:MM` local time, or a dash.
fn stamp(ts: Option<i64>) -> String {
    ts.and_then(|t| chrono::DateTime::from_timestamp(t, 0))
        .map_or_else(|| "-".to_string(), |dt| dt.format("%Y-%m-%d %H:%M").to_string())
}

// ── search renderings (format parameter) ────────────────────────────────────

/// Markdown body for `search_conversations` with `format: "markdown"`.
#[must_use]
pub fn render_search_markdown(out: &SearchOutput) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Conversation matches for `{}`", out.query);
    let _ = writeln!(
        md,
        "\n{} match(es) across {} conversation(s).\n",
        out.total_matches, out.processed_conversations
    );
    for hit in &out.conversations {
        let _ = writeln!(
            md,
            "## {} ({})",
            hit.summary.title, hit.summary.source_tool
        );
        let _ = writeln!(
            md,
            "- updated: {} · messages: {} · matched in: {}",
            stamp(hit.summary.updated_at),
            hit.summary.message_count,
            hit.matched_in.join(", ")
        );
        for excerpt in &hit.excerpts {
            let _ = writeln!(md, "> {excerpt}");
        }
        let _ = writeln!(md);
    }
    if !out.errors.is_empty() {
        let _ = writeln!(md, "---");
        for err in &out.errors {
            let _ = writeln!(md, "- degraded source `{}`: {}", err.source, err.message);
        }
    }
    md
}

/// Compact one-line-per-hit body for `format: "cursor"`.
#[must_use]
pub fn render_search_cursor(out: &SearchOutput) -> String {
    let mut text = String::new();
    for hit in &out.conversations {
        let _ = writeln!(
            text,
            "[{}] {} | {} | {} msgs",
            hit.summary.source_tool,
            hit.summary.title,
            stamp(hit.summary.updated_at),
            hit.summary.message_count,
        );
    }
    if text.is_empty() {
        text.push_str("no matches\n");
    }
    text
}

// ── CLI formatters ──────────────────────────────────────────────────────────

pub fn fmt_info(w: &mut impl Write, out: &ProjectInfoOutput, color: bool) -> io::Result<()> {
    if color {
        writeln!(w, "{}  ({})", out.project_name.bold(), out.project_root.dimmed())?;
    } else {
        writeln!(w, "{}  ({})", out.project_name, out.project_root)?;
    }
    match &out.git {
        Some(git) => writeln!(
            w,
            "git: {} @ {}{}",
            git.branch,
            git.head,
            if git.dirty { " (dirty)" } else { "" }
        )?,
        None => writeln!(w, "git: not a repository")?,
    }
    if let Some(stats) = &out.file_stats {
        writeln!(w, "files: {}", stats.total_files)?;
        for (ext, count) in &stats.by_extension {
            let label = if ext.is_empty() { "(none)" } else { ext };
            writeln!(w, "  {label:>10}  {count}")?;
        }
    }
    Ok(())
}

pub fn fmt_files(w: &mut impl Write, out: &ListFilesOutput, color: bool) -> io::Result<()> {
    match &out.priorities {
        Some(groups) => {
            for (label, group) in [
                ("high", &groups.high),
                ("medium", &groups.medium),
                ("low", &groups.low),
            ] {
                if group.is_empty() {
                    continue;
                }
                if color {
                    writeln!(w, "{}", label.bold())?;
                } else {
                    writeln!(w, "{label}")?;
                }
                for file in group {
                    writeln!(w, "  {:>6.2}  {}", file.score, file.path)?;
                }
            }
        }
        None => {
            for file in &out.files {
                writeln!(w, "{file}")?;
            }
        }
    }
    if out.truncated {
        if color {
            writeln!(w, "{}", "... listing truncated at the file cap".dimmed())?;
        } else {
            writeln!(w, "... listing truncated at the file cap")?;
        }
    }
    Ok(())
}

pub fn fmt_recall(w: &mut impl Write, out: &RecallOutput, color: bool) -> io::Result<()> {
    for conv in &out.conversations {
        let when = stamp(conv.updated_at);
        if color {
            writeln!(
                w,
                "{}  {} {} ({} msgs)",
                when.dimmed(),
                format_args!("[{}]", conv.source_tool),
                conv.title.bold(),
                conv.message_count
            )?;
        } else {
            writeln!(
                w,
                "{}  [{}] {} ({} msgs)",
                when, conv.source_tool, conv.title, conv.message_count
            )?;
        }
        if let Some(snippet) = &conv.snippet {
            writeln!(w, "      {snippet}")?;
        }
    }
    for err in &out.errors {
        if color {
            writeln!(w, "{} {}: {}", "degraded".yellow(), err.source, err.message)?;
        } else {
            writeln!(w, "degraded {}: {}", err.source, err.message)?;
        }
    }
    Ok(())
}

pub fn fmt_search(w: &mut impl Write, out: &SearchOutput, color: bool) -> io::Result<()> {
    for hit in &out.conversations {
        if color {
            writeln!(
                w,
                "{} {} ({})",
                format_args!("[{}]", hit.summary.source_tool).dimmed(),
                hit.summary.title.bold(),
                hit.matched_in.join("+")
            )?;
        } else {
            writeln!(
                w,
                "[{}] {} ({})",
                hit.summary.source_tool,
                hit.summary.title,
                hit.matched_in.join("+")
            )?;
        }
        for excerpt in &hit.excerpts {
            writeln!(w, "  > {excerpt}")?;
        }
    }
    writeln!(
        w,
        "{} match(es), {} conversation(s) scanned",
        out.total_matches, out.processed_conversations
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::SourceError;
    use crate::tools::TextFormat;
    use crate::types::{ConversationMatch, ConversationSummary, SourceTool};

    fn search_output() -> SearchOutput {
        SearchOutput {
            query: "cache".into(),
            total_matches: 1,
            processed_conversations: 3,
            conversations: vec![ConversationMatch {
                summary: ConversationSummary {
                    id: "c1".into(),
                    source_tool: SourceTool::Cursor,
                    workspace_hash: None,
                    title: "Refactor the cache".into(),
                    created_at: None,
                    updated_at: Some(1_700_000_000),
                    message_count: 4,
                    snippet: None,
                },
                matched_in: vec!["title".into()],
                excerpts: vec!["the cache is slow".into()],
            }],
            errors: vec![SourceError {
                source: "windsurf".into(),
                message: "state dir missing".into(),
            }],
            format: TextFormat::Markdown,
        }
    }

    #[test]
    fn test_markdown_rendering() {
        let md = render_search_markdown(&search_output());
        assert!(md.contains("# Conversation matches for `cache`"));
        assert!(md.contains("## Refactor the cache (cursor)"));
        assert!(md.contains("> the cache is slow"));
        assert!(md.contains("degraded source `windsurf`"));
    }

    #[test]
    fn test_cursor_rendering() {
        let text = render_search_cursor(&search_output());
        assert!(text.starts_with("[cursor] Refactor the cache"));
        assert!(text.contains("4 msgs"));
    }

    #[test]
    fn test_cli_search_plain() {
        let mut buf = Vec::new();
        fmt_search(&mut buf, &search_output(), false).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("[cursor] Refactor the cache (title)"));
        assert!(text.contains("1 match(es), 3 conversation(s) scanned"));
    }
}
