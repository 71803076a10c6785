//! Integration tests for extractors and the aggregator against fixture
//! on-disk stores.

mod common;

use common::{
    claude_session, cursor_workspace, fixture_extractors, now_secs, with_broken_windsurf, TestEnv,
};
use gandalf::extractors::{ClaudeCodeExtractor, CursorExtractor, Extractor, RecallOptions};
use gandalf::tools::{execute_recall, RecallInput};
use gandalf::types::SourceTool;

#[test]
fn test_degraded_source_reports_inline_error() {
    let env = TestEnv::new();
    let aggregator = env.aggregator(with_broken_windsurf(fixture_extractors(&env)));

    let out = execute_recall(&aggregator, &env.weights, RecallInput::default()).unwrap();

    // The broken windsurf driver degrades without masking the others.
    assert_eq!(out.total_conversations, 3);
    assert_eq!(out.errors.len(), 1);
    assert_eq!(out.errors[0].source, "windsurf");
    assert!(out.errors[0].message.contains("State directory not found"));
}

#[test]
fn test_workspace_filter() {
    let env = TestEnv::new();
    let now = now_secs();
    let storage = env.storage_dir("cursor");
    cursor_workspace(&storage, "workspace-one", &[("t1", "first ws chat", now - 100)]);
    cursor_workspace(&storage, "workspace-two", &[("t2", "second ws chat", now - 200)]);

    let extractors: Vec<Box<dyn Extractor>> =
        vec![Box::new(CursorExtractor::new(vec![storage]))];
    let aggregator = env.aggregator(extractors);

    let out = execute_recall(
        &aggregator,
        &env.weights,
        RecallInput {
            workspace_filter: Some("workspace-two".into()),
            ..RecallInput::default()
        },
    )
    .unwrap();

    assert_eq!(out.total_conversations, 1);
    assert_eq!(out.conversations[0].title, "second ws chat");
}

#[test]
fn test_index_cache_hit_then_fingerprint_invalidation() {
    let env = TestEnv::new();
    let now = now_secs();
    let storage = env.storage_dir("cursor");
    cursor_workspace(&storage, "ws", &[("t1", "original title", now - 100)]);

    let extractors: Vec<Box<dyn Extractor>> =
        vec![Box::new(CursorExtractor::new(vec![storage.clone()]))];
    let aggregator = env.aggregator(extractors);

    let first = aggregator.recall(&RecallOptions::default(), None);
    assert_eq!(first.conversations.len(), 1);
    assert_eq!(first.conversations[0].title, "original title");

    // A second run with unchanged state serves the cached index.
    let cached = aggregator.recall(&RecallOptions::default(), None);
    assert_eq!(cached.conversations.len(), 1);

    // A new workspace database changes the observed state-file set, which
    // flips the fingerprint even within the TTL; the cached index must be
    // discarded and rebuilt.
    cursor_workspace(&storage, "ws2", &[("t2", "appeared later", now - 50)]);

    let second = aggregator.recall(&RecallOptions::default(), None);
    assert_eq!(second.conversations.len(), 2);
    assert_eq!(second.conversations[0].title, "appeared later");
}

#[test]
fn test_dedupe_across_duplicate_state_dirs() {
    let env = TestEnv::new();
    let now = now_secs();
    // The same storage root configured twice (e.g. a symlinked install)
    // yields identical native ids; the aggregate must carry each once.
    let storage = env.storage_dir("cursor");
    cursor_workspace(&storage, "ws", &[("tab-dup", "only once", now - 100)]);

    let extractors: Vec<Box<dyn Extractor>> = vec![
        Box::new(CursorExtractor::new(vec![storage.clone()])),
        Box::new(CursorExtractor::new(vec![storage])),
    ];
    let aggregator = env.aggregator(extractors);

    let out = execute_recall(&aggregator, &env.weights, RecallInput::default()).unwrap();
    assert_eq!(out.total_conversations, 1);
}

#[test]
fn test_days_lookback_filters_old_sessions() {
    let env = TestEnv::new();
    let now = now_secs();
    let projects = env.dir.path().join("claude-projects");
    std::fs::create_dir_all(&projects).unwrap();
    claude_session(&projects, "-proj", "recent", "Recent work", now - 3600);
    claude_session(&projects, "-proj", "ancient", "Ancient work", now - 90 * 86_400);

    let extractors: Vec<Box<dyn Extractor>> =
        vec![Box::new(ClaudeCodeExtractor::new(vec![projects]))];
    let aggregator = env.aggregator(extractors);

    let out = execute_recall(
        &aggregator,
        &env.weights,
        RecallInput {
            days_lookback: Some(30),
            ..RecallInput::default()
        },
    )
    .unwrap();
    assert_eq!(out.total_conversations, 1);
    assert_eq!(out.conversations[0].title, "Recent work");

    let all = execute_recall(
        &aggregator,
        &env.weights,
        RecallInput {
            days_lookback: Some(0),
            ..RecallInput::default()
        },
    )
    .unwrap();
    assert_eq!(all.total_conversations, 2);
}

#[test]
fn test_message_count_invariant_across_sources() {
    let env = TestEnv::new();
    let aggregator = env.aggregator(fixture_extractors(&env));

    let (conversations, errors) = aggregator.export(None, 100);
    assert!(errors.is_empty());
    assert!(!conversations.is_empty());
    for conv in &conversations {
        if !conv.prompts.is_empty() || !conv.generations.is_empty() {
            assert_eq!(
                conv.message_count,
                conv.prompts.len() + conv.generations.len(),
                "invariant violated for {}",
                conv.id
            );
        }
    }
}

#[test]
fn test_summaries_sorted_newest_first() {
    let env = TestEnv::new();
    let aggregator = env.aggregator(fixture_extractors(&env));

    let out = execute_recall(&aggregator, &env.weights, RecallInput::default()).unwrap();
    let stamps: Vec<i64> = out
        .conversations
        .iter()
        .filter_map(|c| c.updated_at)
        .collect();
    let mut sorted = stamps.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(stamps, sorted);
}

#[test]
fn test_source_tool_attribution() {
    let env = TestEnv::new();
    let aggregator = env.aggregator(fixture_extractors(&env));

    let out = execute_recall(&aggregator, &env.weights, RecallInput::default()).unwrap();
    for conv in &out.conversations {
        match conv.source_tool {
            SourceTool::Cursor => assert!(conv.workspace_hash.as_deref() == Some("a1b2c3")),
            SourceTool::ClaudeCode => {
                assert!(conv.workspace_hash.as_deref() == Some("-work-project"));
            }
            SourceTool::Windsurf => panic!("no windsurf fixtures configured"),
        }
    }
}
