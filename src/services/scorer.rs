//! Relevance scoring.
//!
//! Sums weighted contributions from independent signals per file, clamps
//! to the configured floor, and buckets into priority tiers. Contributing
//! signals are kept per file so tool output can show why a file ranked
//! where it did.

use crate::config::WeightsConfig;
use crate::types::{FileEntry, Priority, ScoredFile};
use ahash::{AHashMap, AHashSet};
use std::path::Path;

/// Multiplier for files smaller than the optimal window.
const TINY_FILE_MULTIPLIER: f64 = 0.1;

/// Per-file byte cap when reading contents for the import-relationship pass.
const IMPORT_SCAN_MAX_BYTES: u64 = 256 * 1024;

/// Everything the scorer needs besides the entries themselves.
pub struct ScoringContext<'a> {
    pub weights: &'a WeightsConfig,
    /// Epoch seconds "now"; parameterized for deterministic tests.
    pub now: i64,
    /// Output of the git tracker: relative path → last touch.
    pub recent_files: &'a AHashMap<String, i64>,
    /// Lowercased concatenation of cached conversation text within the
    /// lookback window; empty disables the mention signal.
    pub conversation_text: &'a str,
    /// Project root, used by the optional import pass.
    pub root: &'a Path,
}

/// Scores, sorts, and tiers a set of file entries.
///
/// Ties break by newer mtime, then shorter path. The returned list is
/// capped at `display.max_top_files` with per-tier caps applied.
#[must_use]
pub fn score_files(entries: Vec<FileEntry>, ctx: &ScoringContext<'_>) -> Vec<ScoredFile> {
    let mut scored: Vec<ScoredFile> = entries
        .into_iter()
        .map(|entry| score_one(entry, ctx))
        .collect();

    sort_scored(&mut scored);

    if ctx.weights.weights.import_relationship > 0.0 {
        apply_import_signal(&mut scored, ctx);
        sort_scored(&mut scored);
    }

    apply_display_caps(scored, ctx.weights)
}

fn sort_scored(scored: &mut [ScoredFile]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.entry.mtime.cmp(&a.entry.mtime))
            .then_with(|| {
                a.entry
                    .relative_path
                    .as_os_str()
                    .len()
                    .cmp(&b.entry.relative_path.as_os_str().len())
            })
            .then_with(|| a.entry.relative_path.cmp(&b.entry.relative_path))
    });
}

fn score_one(entry: FileEntry, ctx: &ScoringContext<'_>) -> ScoredFile {
    let w = &ctx.weights.weights;
    let mut signals: AHashMap<&'static str, f64> = AHashMap::new();

    // Recency
    let age = (ctx.now - entry.mtime).max(0) as u64;
    let recency_mult = recency_multiplier(age, ctx.weights);
    if recency_mult > 0.0 {
        signals.insert("recent_modification", w.recent_modification * recency_mult);
    }

    // Size fit
    let size_mult = size_multiplier(entry.size_bytes, ctx.weights);
    if size_mult > 0.0 {
        signals.insert("file_size_optimal", w.file_size_optimal * size_mult);
    }

    // Extension
    if let Some(ext) = &entry.extension {
        if let Some(weight) = ctx.weights.extensions.get(ext) {
            signals.insert("file_type_priority", w.file_type_priority * weight);
        }
    }

    // Directory
    let dir_weight: f64 = if entry.directory_segments.is_empty() {
        ctx.weights.root_directory_weight
    } else {
        entry
            .directory_segments
            .iter()
            .filter_map(|seg| ctx.weights.directories.get(seg))
            .sum()
    };
    if dir_weight > 0.0 {
        signals.insert("directory_importance", w.directory_importance * dir_weight);
    }

    // Git activity
    let rel = entry.relative_path.to_string_lossy();
    if let Some(&touched) = ctx.recent_files.get(rel.as_ref()) {
        let git_age = (ctx.now - touched).max(0) as u64;
        let mult = recency_multiplier(git_age, ctx.weights).max(ctx.weights.recency.week_multiplier);
        signals.insert("git_activity", w.git_activity * mult);
    }

    // Conversation mention
    if !ctx.conversation_text.is_empty()
        && (mentioned(ctx.conversation_text, entry.file_name())
            || mentioned(ctx.conversation_text, rel.as_ref()))
    {
        signals.insert("conversation_mention", w.conversation_mention);
    }

    let score = signals
        .values()
        .sum::<f64>()
        .max(ctx.weights.min_score);
    let priority = priority_for(score, ctx.weights);

    ScoredFile {
        entry,
        score,
        priority,
        contributing_signals: signals,
    }
}

fn recency_multiplier(age_secs: u64, cfg: &WeightsConfig) -> f64 {
    let r = &cfg.recency;
    if age_secs <= r.hour_threshold {
        r.hour_multiplier
    } else if age_secs <= r.day_threshold {
        r.day_multiplier
    } else if age_secs <= r.week_threshold {
        r.week_multiplier
    } else {
        0.0
    }
}

fn size_multiplier(size: u64, cfg: &WeightsConfig) -> f64 {
    let s = &cfg.size;
    if size < s.optimal_min {
        TINY_FILE_MULTIPLIER
    } else if size <= s.optimal_max {
        1.0
    } else if size <= s.acceptable_max {
        s.acceptable_multiplier
    } else {
        s.large_multiplier
    }
}

fn priority_for(score: f64, cfg: &WeightsConfig) -> Priority {
    if score >= cfg.display.high_priority {
        Priority::High
    } else if score >= cfg.display.medium_priority {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Case-insensitive word-boundary containment: the needle occurs in the
/// haystack with no identifier character on either side.
fn mentioned(haystack_lower: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let needle = needle.to_lowercase();
    let bytes = haystack_lower.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack_lower[from..].find(&needle) {
        let start = from + pos;
        let end = start + needle.len();
        let before_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
        from = start + 1;
    }
    false
}

const fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Single-pass import signal: files whose stem is imported by one of the
/// current top files receive the `import_relationship` weight. No
/// transitive closure.
fn apply_import_signal(scored: &mut [ScoredFile], ctx: &ScoringContext<'_>) {
    let top_count = ctx.weights.display.max_top_files.min(scored.len());
    let mut imported_stems: AHashSet<String> = AHashSet::new();

    for file in scored.iter().take(top_count) {
        if file.entry.size_bytes > IMPORT_SCAN_MAX_BYTES {
            continue;
        }
        let path = ctx.root.join(&file.entry.relative_path);
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for line in content.lines().take(500) {
            let line = line.trim_start();
            let is_import = line.starts_with("use ")
                || line.starts_with("import ")
                || line.starts_with("from ")
                || line.starts_with("mod ")
                || line.starts_with("require(")
                || line.starts_with("include ")
                || line.starts_with("#include");
            if !is_import {
                continue;
            }
            for token in line
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .filter(|t| t.len() > 2)
            {
                imported_stems.insert(token.to_lowercase());
            }
        }
    }

    for file in scored.iter_mut() {
        let stem = file
            .entry
            .relative_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_lowercase);
        if let Some(stem) = stem {
            if imported_stems.contains(&stem)
                && !file.contributing_signals.contains_key("import_relationship")
            {
                let add = ctx.weights.weights.import_relationship;
                file.contributing_signals.insert("import_relationship", add);
                file.score += add;
                file.priority = priority_for(file.score, ctx.weights);
            }
        }
    }
}

/// Applies `max_high_priority` / `max_medium_priority` per tier and
/// `max_top_files` overall, preserving sort order.
fn apply_display_caps(scored: Vec<ScoredFile>, cfg: &WeightsConfig) -> Vec<ScoredFile> {
    let d = &cfg.display;
    let mut high = 0usize;
    let mut medium = 0usize;
    let mut out = Vec::with_capacity(scored.len().min(d.max_top_files));

    for file in scored {
        if out.len() >= d.max_top_files {
            break;
        }
        match file.priority {
            Priority::High => {
                if high >= d.max_high_priority {
                    continue;
                }
                high += 1;
            }
            Priority::Medium => {
                if medium >= d.max_medium_priority {
                    continue;
                }
                medium += 1;
            }
            Priority::Low => {}
        }
        out.push(file);
    }
    out
}
