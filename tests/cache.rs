//! Integration tests for cache persistence and TTL behavior through the
//! public API, configured the way the server configures it.

use gandalf::cache::{Cache, NamespaceSettings};
use std::time::Duration;

#[test]
fn test_round_trip_and_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::new(dir.path().join("cache"));
    cache.configure(
        "git",
        NamespaceSettings {
            ttl: Duration::from_millis(50),
            max_entries: 64,
        },
    );

    cache.put("git", "recent:/proj", &vec!["a.rs", "b.rs"], None).unwrap();
    let hit: Vec<String> = cache.get("git", "recent:/proj").unwrap();
    assert_eq!(hit, vec!["a.rs", "b.rs"]);

    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(cache.get::<Vec<String>>("git", "recent:/proj"), None);
}

#[test]
fn test_entries_survive_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache");

    {
        let cache = Cache::new(path.clone());
        cache
            .put("conversations", "cursor:full", &serde_json::json!({"n": 3}), None)
            .unwrap();
    }

    // A fresh Cache simulates a restarted server; the entry loads lazily.
    let cache = Cache::new(path);
    let value: serde_json::Value = cache.get("conversations", "cursor:full").unwrap();
    assert_eq!(value["n"], 3);
}

#[test]
fn test_persistence_leaves_no_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::new(dir.path().join("cache"));
    for i in 0..20 {
        cache.put("git", &format!("key-{i}"), &i, None).unwrap();
    }

    let ns_dir = dir.path().join("cache").join("git");
    let names: Vec<String> = std::fs::read_dir(&ns_dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names.len(), 20);
    assert!(names.iter().all(|n| n.ends_with(".bin")), "stray files: {names:?}");
}

#[test]
fn test_fingerprinted_namespace_mismatch_invalidates() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::new(dir.path().join("cache"));

    cache
        .put_fingerprinted("conversations", "cursor:full", &"index-v1", None, "aaa")
        .unwrap();
    assert_eq!(
        cache.get_fingerprinted::<String>("conversations", "cursor:full", "aaa"),
        Some("index-v1".into())
    );

    // State files changed: new fingerprint misses and drops the entry.
    assert_eq!(
        cache.get_fingerprinted::<String>("conversations", "cursor:full", "bbb"),
        None
    );
    assert_eq!(
        cache.get_fingerprinted::<String>("conversations", "cursor:full", "aaa"),
        None
    );
}

#[test]
fn test_namespace_invalidation_is_scoped() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::new(dir.path().join("cache"));

    cache.put("git", "a", &1, None).unwrap();
    cache.put("conversations", "b", &2, None).unwrap();

    cache.invalidate("git", None);
    assert_eq!(cache.get::<i32>("git", "a"), None);
    assert_eq!(cache.get::<i32>("conversations", "b"), Some(2));
}
