//! Namespaced key→value cache with TTL, LRU bounds, and atomic file
//! persistence.
//!
//! Each namespace carries its own lock, TTL, and entry bound. Values are
//! serialized as compact JSON. A `put` writes `<dir>/<ns>/<key>.tmp`,
//! fsyncs, then renames over `<key>.bin`; entries persisted by an earlier
//! process are loaded lazily on first `get`.
//!
//! Fingerprint-validated namespaces (conversation indexes) store a caller
//! fingerprint next to the value and treat a mismatch as a miss plus
//! invalidation.

use crate::error::{CacheError, Result};
use ahash::AHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Per-namespace tuning.
#[derive(Debug, Clone, Copy)]
pub struct NamespaceSettings {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for NamespaceSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 256,
        }
    }
}

/// On-disk and in-memory entry envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    /// Seconds since the Unix epoch at store time.
    stored_at: f64,
    ttl_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
    value: serde_json::Value,
    /// Monotonic access counter for LRU; not persisted meaningfully.
    #[serde(default)]
    last_access: u64,
}

impl Entry {
    fn is_expired(&self, now: f64) -> bool {
        now > self.stored_at + self.ttl_seconds
    }
}

struct Namespace {
    settings: NamespaceSettings,
    entries: Mutex<AHashMap<String, Entry>>,
}

/// The process-wide cache.
pub struct Cache {
    dir: PathBuf,
    namespaces: RwLock<AHashMap<String, std::sync::Arc<Namespace>>>,
    access_clock: std::sync::atomic::AtomicU64,
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Maps a cache key to a filesystem-safe file stem. Keys that are already
/// plain identifiers pass through; anything else is hashed.
fn file_stem(key: &str) -> String {
    let safe = !key.is_empty()
        && key.len() <= 80
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if safe {
        return key.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    digest[..12].iter().map(|b| format!("{b:02x}")).collect()
}

impl Cache {
    /// Creates a cache rooted at `dir` (typically `GANDALF_HOME/cache`).
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            namespaces: RwLock::new(AHashMap::new()),
            access_clock: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Registers (or retunes) a namespace. Unregistered namespaces get
    /// [`NamespaceSettings::default`] on first use.
    pub fn configure(&self, ns: &str, settings: NamespaceSettings) {
        let mut map = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(ns) {
            Some(existing) => {
                // Settings are read at put/evict time through the Arc, so a
                // retune requires a fresh namespace carrying over entries.
                let entries = std::mem::take(
                    &mut *existing.entries.lock().unwrap_or_else(|e| e.into_inner()),
                );
                map.insert(
                    ns.to_string(),
                    std::sync::Arc::new(Namespace {
                        settings,
                        entries: Mutex::new(entries),
                    }),
                );
            }
            None => {
                map.insert(
                    ns.to_string(),
                    std::sync::Arc::new(Namespace {
                        settings,
                        entries: Mutex::new(AHashMap::new()),
                    }),
                );
            }
        }
    }

    fn namespace(&self, ns: &str) -> std::sync::Arc<Namespace> {
        {
            let map = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
            if let Some(found) = map.get(ns) {
                return std::sync::Arc::clone(found);
            }
        }
        let mut map = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
        std::sync::Arc::clone(map.entry(ns.to_string()).or_insert_with(|| {
            std::sync::Arc::new(Namespace {
                settings: NamespaceSettings::default(),
                entries: Mutex::new(AHashMap::new()),
            })
        }))
    }

    fn tick(&self) -> u64 {
        self.access_clock
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    fn entry_path(&self, ns: &str, key: &str) -> PathBuf {
        self.dir.join(ns).join(format!("{}.bin", file_stem(key)))
    }

    /// Looks up a value, honoring TTL and lazily loading persisted entries.
    pub fn get<T: DeserializeOwned>(&self, ns: &str, key: &str) -> Option<T> {
        self.get_with_fingerprint(ns, key, None)
    }

    /// Like [`Cache::get`], but additionally requires the stored
    /// fingerprint to equal `fingerprint`. A mismatch is a miss and
    /// invalidates the entry.
    pub fn get_fingerprinted<T: DeserializeOwned>(
        &self,
        ns: &str,
        key: &str,
        fingerprint: &str,
    ) -> Option<T> {
        self.get_with_fingerprint(ns, key, Some(fingerprint))
    }

    fn get_with_fingerprint<T: DeserializeOwned>(
        &self,
        ns: &str,
        key: &str,
        fingerprint: Option<&str>,
    ) -> Option<T> {
        let namespace = self.namespace(ns);
        let now = now_secs();
        let tick = self.tick();

        let mut entries = namespace.entries.lock().unwrap_or_else(|e| e.into_inner());

        if !entries.contains_key(key) {
            if let Some(loaded) = self.load_persisted(ns, key) {
                entries.insert(key.to_string(), loaded);
            }
        }

        let expired_or_mismatch = match entries.get_mut(key) {
            None => return None,
            Some(entry) => {
                if entry.is_expired(now) {
                    true
                } else if let Some(expect) = fingerprint {
                    if entry.fingerprint.as_deref() != Some(expect) {
                        true
                    } else {
                        entry.last_access = tick;
                        false
                    }
                } else {
                    entry.last_access = tick;
                    false
                }
            }
        };

        if expired_or_mismatch {
            entries.remove(key);
            drop(entries);
            let _ = std::fs::remove_file(self.entry_path(ns, key));
            return None;
        }

        let value = entries.get(key).map(|e| e.value.clone())?;
        drop(entries);
        serde_json::from_value(value).ok()
    }

    /// Stores a value with an explicit TTL (namespace default when `None`),
    /// evicting the least-recently-used entry when the namespace is full,
    /// and persisting atomically.
    pub fn put<T: Serialize>(
        &self,
        ns: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.put_inner(ns, key, value, ttl, None)
    }

    /// Stores a value together with a source fingerprint.
    pub fn put_fingerprinted<T: Serialize>(
        &self,
        ns: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        fingerprint: &str,
    ) -> Result<()> {
        self.put_inner(ns, key, value, ttl, Some(fingerprint.to_string()))
    }

    fn put_inner<T: Serialize>(
        &self,
        ns: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        fingerprint: Option<String>,
    ) -> Result<()> {
        let namespace = self.namespace(ns);
        let ttl = ttl.unwrap_or(namespace.settings.ttl);
        let entry = Entry {
            stored_at: now_secs(),
            ttl_seconds: ttl.as_secs_f64(),
            fingerprint,
            value: serde_json::to_value(value)?,
            last_access: self.tick(),
        };

        self.persist(ns, key, &entry)?;

        let mut entries = namespace.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), entry);

        while entries.len() > namespace.settings.max_entries {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    entries.remove(&k);
                    let path = self.entry_path(ns, &k);
                    let _ = std::fs::remove_file(path);
                }
                None => break,
            }
        }

        Ok(())
    }

    /// Drops one key, or the whole namespace when `key` is `None`.
    pub fn invalidate(&self, ns: &str, key: Option<&str>) {
        let namespace = self.namespace(ns);
        let mut entries = namespace.entries.lock().unwrap_or_else(|e| e.into_inner());
        match key {
            Some(k) => {
                entries.remove(k);
                let _ = std::fs::remove_file(self.entry_path(ns, k));
            }
            None => {
                entries.clear();
                let _ = std::fs::remove_dir_all(self.dir.join(ns));
            }
        }
    }

    /// Drops every namespace, memory and disk.
    pub fn clear_all(&self) {
        let map = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
        for namespace in map.values() {
            namespace
                .entries
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
        }
        drop(map);
        let _ = std::fs::remove_dir_all(&self.dir);
    }

    /// Write-to-temp, fsync, rename. The rename makes a torn write
    /// invisible to readers.
    fn persist(&self, ns: &str, key: &str, entry: &Entry) -> Result<()> {
        let ns_dir = self.dir.join(ns);
        std::fs::create_dir_all(&ns_dir).map_err(|source| CacheError::Persist {
            key: key.to_string(),
            source,
        })?;

        let stem = file_stem(key);
        let tmp = ns_dir.join(format!("{stem}.tmp"));
        let fin = ns_dir.join(format!("{stem}.bin"));

        let bytes = serde_json::to_vec(entry)?;
        let write = || -> std::io::Result<()> {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
            std::fs::rename(&tmp, &fin)
        };
        write().map_err(|source| CacheError::Persist {
            key: key.to_string(),
            source,
        })?;
        Ok(())
    }

    fn load_persisted(&self, ns: &str, key: &str) -> Option<Entry> {
        let path = self.entry_path(ns, key);
        let bytes = std::fs::read(&path).ok()?;
        match serde_json::from_slice::<Entry>(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Discarding corrupt cache entry: {e}");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }
}
