//! Conversation aggregator.
//!
//! Drives every detected extractor across its workspaces on a bounded
//! rayon pool, merges and dedupes the results, and caches a per-tool index
//! in the `conversations` namespace keyed by a source fingerprint (the
//! hashed set of state-file paths, sizes, and mtimes). A failure in one
//! source degrades that source only; its errors ride along in the result
//! next to the payload from the sources that succeeded.

use crate::cache::Cache;
use crate::extractors::{Extractor, QueryOptions, RecallOptions, SCAN_BUDGET_PER_WORKSPACE};
use crate::types::{Conversation, ConversationMatch, ConversationSummary};
use ahash::AHashSet;
use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

const NS: &str = "conversations";

/// One source's failure, reported inline in an otherwise successful
/// aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SourceError {
    pub source: String,
    pub message: String,
}

/// Merged recall across every source.
#[derive(Debug, Default, Serialize)]
pub struct AggregatedRecall {
    pub conversations: Vec<ConversationSummary>,
    pub errors: Vec<SourceError>,
    pub processed_workspaces: usize,
    /// Conversations available before limit/lookback filtering.
    pub total_available: usize,
}

/// Merged search across every source.
#[derive(Debug, Default, Serialize)]
pub struct AggregatedSearch {
    pub matches: Vec<ConversationMatch>,
    pub errors: Vec<SourceError>,
    pub processed_conversations: usize,
}

/// Per-tool cached index entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolIndex {
    summaries: Vec<ConversationSummary>,
    workspaces: usize,
}

/// Fans out across extractors and merges their results.
pub struct Aggregator {
    extractors: Arc<Vec<Box<dyn Extractor>>>,
    cache: Arc<Cache>,
    cache_ttl: Duration,
    pool: rayon::ThreadPool,
}

impl Aggregator {
    /// # Panics
    ///
    /// Panics only if the rayon pool cannot be built, which requires an
    /// exhausted system at startup.
    #[must_use]
    pub fn new(
        extractors: Arc<Vec<Box<dyn Extractor>>>,
        cache: Arc<Cache>,
        cache_ttl_secs: u64,
    ) -> Self {
        let workers = usize::min(8, 2 * std::thread::available_parallelism().map_or(4, usize::from));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("gandalf-extract-{i}"))
            .build()
            .expect("extractor worker pool");
        Self {
            extractors,
            cache,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            pool,
        }
    }

    /// SHA-256 over the sorted `(path, size, mtime)` set an extractor
    /// observes. Any state-file change flips the fingerprint and
    /// invalidates that tool's cached index.
    fn fingerprint(extractor: &dyn Extractor) -> String {
        let mut inputs = extractor.fingerprint_inputs();
        inputs.sort();
        let mut hasher = Sha256::new();
        for (path, size, mtime) in &inputs {
            hasher.update(path.to_string_lossy().as_bytes());
            hasher.update(size.to_le_bytes());
            hasher.update(mtime.to_le_bytes());
        }
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Builds (or loads) one tool's conversation index.
    fn tool_index(
        &self,
        extractor: &dyn Extractor,
        fast_mode: bool,
    ) -> (ToolIndex, Vec<SourceError>) {
        let tool = extractor.tool();
        let key = format!("{}:{}", tool.id(), if fast_mode { "fast" } else { "full" });
        let fingerprint = Self::fingerprint(extractor);

        if let Some(index) = self
            .cache
            .get_fingerprinted::<ToolIndex>(NS, &key, &fingerprint)
        {
            tracing::debug!(tool = %tool, "Conversation index cache hit");
            return (index, Vec::new());
        }

        let mut errors = Vec::new();
        let workspaces = match extractor.list_workspaces() {
            Ok(ws) => ws,
            Err(e) => {
                errors.push(SourceError {
                    source: tool.id().to_string(),
                    message: e.to_string(),
                });
                return (
                    ToolIndex {
                        summaries: Vec::new(),
                        workspaces: 0,
                    },
                    errors,
                );
            }
        };

        // The index is built unfiltered (all history, per-workspace budget)
        // so one cache entry serves every recall/search parameterization.
        let opts = RecallOptions {
            limit: SCAN_BUDGET_PER_WORKSPACE,
            days_lookback: 0,
            fast_mode,
        };

        let per_workspace: Vec<(Vec<ConversationSummary>, Vec<SourceError>)> = self
            .pool
            .install(|| {
                workspaces
                    .par_iter()
                    .map(|ws| {
                        let (summaries, errs) = extractor.recall(ws, &opts);
                        let errs = errs
                            .into_iter()
                            .map(|e| SourceError {
                                source: format!("{}/{}", tool.id(), ws.workspace_hash),
                                message: e.to_string(),
                            })
                            .collect();
                        (summaries, errs)
                    })
                    .collect()
            });

        let mut summaries = Vec::new();
        for (mut s, mut e) in per_workspace {
            summaries.append(&mut s);
            errors.append(&mut e);
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let index = ToolIndex {
            workspaces: workspaces.len(),
            summaries,
        };
        if let Err(e) = self.cache.put_fingerprinted(
            NS,
            &key,
            &index,
            Some(self.cache_ttl),
            &fingerprint,
        ) {
            tracing::warn!(tool = %tool, "Failed to cache conversation index: {e}");
        }
        (index, errors)
    }

    /// Recall across all sources: merge, dedupe, filter, rank, cap.
    #[must_use]
    pub fn recall(&self, opts: &RecallOptions, workspace_filter: Option<&str>) -> AggregatedRecall {
        let per_tool: Vec<(ToolIndex, Vec<SourceError>)> = self.pool.install(|| {
            self.extractors
                .par_iter()
                .map(|e| self.tool_index(e.as_ref(), opts.fast_mode))
                .collect()
        });

        let mut merged = Vec::new();
        let mut errors = Vec::new();
        let mut processed_workspaces = 0;
        for (index, mut errs) in per_tool {
            processed_workspaces += index.workspaces;
            merged.extend(index.summaries);
            errors.append(&mut errs);
        }

        // Dedupe by (source_tool, native id), first-seen wins. Extractor
        // order is registry order; within a tool the index is newest-first.
        let mut seen = AHashSet::new();
        merged.retain(|c| seen.insert((c.source_tool, c.id.clone())));
        let total_available = merged.len();

        if let Some(filter) = workspace_filter {
            let needle = filter.to_lowercase();
            merged.retain(|c| {
                c.workspace_hash
                    .as_deref()
                    .is_some_and(|h| h.to_lowercase().contains(&needle))
            });
        }
        if let Some(cutoff) = crate::extractors::lookback_cutoff(opts.days_lookback) {
            merged.retain(|c| c.updated_at.is_none_or(|ts| ts >= cutoff));
        }

        merged.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        merged.truncate(opts.limit);

        AggregatedRecall {
            conversations: merged,
            errors,
            processed_workspaces,
            total_available,
        }
    }

    /// Substring search across all sources. Title matches come from the
    /// cached index; content scans fan out to the drivers on demand.
    #[must_use]
    pub fn search(&self, opts: &QueryOptions) -> AggregatedSearch {
        let mut errors = Vec::new();
        let mut processed_conversations = 0;

        // Title pass over the cached per-tool indexes.
        let per_tool: Vec<(ToolIndex, Vec<SourceError>)> = self.pool.install(|| {
            self.extractors
                .par_iter()
                .map(|e| self.tool_index(e.as_ref(), true))
                .collect()
        });

        let needle = opts.query.to_lowercase();
        let mut matches: Vec<ConversationMatch> = Vec::new();
        let mut matched_ids = AHashSet::new();

        for (index, mut errs) in per_tool {
            errors.append(&mut errs);
            processed_conversations += index.summaries.len();
            for summary in index.summaries {
                if summary.title.to_lowercase().contains(&needle)
                    && matched_ids.insert((summary.source_tool, summary.id.clone()))
                {
                    matches.push(ConversationMatch {
                        summary,
                        matched_in: vec!["title".to_string()],
                        excerpts: Vec::new(),
                    });
                }
            }
        }

        // Content pass, budgeted per workspace inside each driver.
        if opts.include_content {
            let content_results: Vec<(Vec<ConversationMatch>, Vec<SourceError>)> =
                self.pool.install(|| {
                    self.extractors
                        .par_iter()
                        .map(|extractor| {
                            let tool = extractor.tool();
                            let mut tool_matches = Vec::new();
                            let mut tool_errors = Vec::new();
                            match extractor.list_workspaces() {
                                Ok(workspaces) => {
                                    for ws in workspaces {
                                        let (hits, errs) = extractor.query(&ws, opts);
                                        tool_matches.extend(hits);
                                        tool_errors.extend(errs.into_iter().map(|e| {
                                            SourceError {
                                                source: format!(
                                                    "{}/{}",
                                                    tool.id(),
                                                    ws.workspace_hash
                                                ),
                                                message: e.to_string(),
                                            }
                                        }));
                                    }
                                }
                                Err(e) => tool_errors.push(SourceError {
                                    source: tool.id().to_string(),
                                    message: e.to_string(),
                                }),
                            }
                            (tool_matches, tool_errors)
                        })
                        .collect()
                });

            for (hits, mut errs) in content_results {
                errors.append(&mut errs);
                for hit in hits {
                    let key = (hit.summary.source_tool, hit.summary.id.clone());
                    if let Some(existing) = matches
                        .iter_mut()
                        .find(|m| (m.summary.source_tool, m.summary.id.as_str()) == (key.0, key.1.as_str()))
                    {
                        // Merge content evidence into the title match.
                        for m in hit.matched_in {
                            if !existing.matched_in.contains(&m) {
                                existing.matched_in.push(m);
                            }
                        }
                        existing.excerpts.extend(hit.excerpts);
                        existing.excerpts.truncate(3);
                    } else if matched_ids.insert(key) {
                        matches.push(hit);
                    }
                }
            }
        }

        matches.sort_by(|a, b| b.summary.updated_at.cmp(&a.summary.updated_at));
        matches.truncate(opts.limit);

        AggregatedSearch {
            matches,
            errors,
            processed_conversations,
        }
    }

    /// Lowercased corpus of cached conversation titles and snippets within
    /// the lookback window. Feeds the scorer's conversation-mention signal;
    /// bounded so a huge history cannot bloat a listing request.
    #[must_use]
    pub fn conversation_haystack(&self, days_lookback: u64, cap_bytes: usize) -> String {
        let result = self.recall(
            &RecallOptions {
                limit: 500,
                days_lookback,
                fast_mode: false,
            },
            None,
        );
        let mut haystack = String::new();
        for conv in &result.conversations {
            if haystack.len() >= cap_bytes {
                break;
            }
            haystack.push_str(&conv.title.to_lowercase());
            haystack.push('\n');
            if let Some(snippet) = &conv.snippet {
                haystack.push_str(&snippet.to_lowercase());
                haystack.push('\n');
            }
        }
        haystack
    }

    /// Full conversations for export, deduped with a content-hash record
    /// of any discarded duplicate.
    #[must_use]
    pub fn export(
        &self,
        filter: Option<&str>,
        limit: usize,
    ) -> (Vec<Conversation>, Vec<SourceError>) {
        let per_tool: Vec<(Vec<Conversation>, Vec<SourceError>)> = self.pool.install(|| {
            self.extractors
                .par_iter()
                .map(|extractor| {
                    let tool = extractor.tool();
                    let mut conversations = Vec::new();
                    let mut errors = Vec::new();
                    match extractor.list_workspaces() {
                        Ok(workspaces) => {
                            for ws in workspaces {
                                let (mut convs, errs) = extractor.export(&ws, filter, limit);
                                conversations.append(&mut convs);
                                errors.extend(errs.into_iter().map(|e| SourceError {
                                    source: format!("{}/{}", tool.id(), ws.workspace_hash),
                                    message: e.to_string(),
                                }));
                            }
                        }
                        Err(e) => errors.push(SourceError {
                            source: tool.id().to_string(),
                            message: e.to_string(),
                        }),
                    }
                    (conversations, errors)
                })
                .collect()
        });

        let mut merged: Vec<Conversation> = Vec::new();
        let mut errors = Vec::new();
        for (convs, mut errs) in per_tool {
            errors.append(&mut errs);
            for conv in convs {
                if let Some(existing) = merged
                    .iter_mut()
                    .find(|c| c.source_tool == conv.source_tool && c.id == conv.id)
                {
                    // First-seen wins; keep the loser observable by hash.
                    let hash = content_hash(&conv);
                    if content_hash(existing) != hash {
                        let list = existing
                            .metadata
                            .entry("duplicate_content_hashes".to_string())
                            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
                        if let Some(arr) = list.as_array_mut() {
                            arr.push(serde_json::Value::String(hash));
                        }
                    }
                } else {
                    merged.push(conv);
                }
            }
        }

        merged.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        merged.truncate(limit);
        (merged, errors)
    }
}

/// SHA-256 over a conversation's normalized content.
fn content_hash(conv: &Conversation) -> String {
    let mut hasher = Sha256::new();
    hasher.update(conv.title.as_bytes());
    for msg in conv.prompts.iter().chain(&conv.generations) {
        hasher.update(msg.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}
