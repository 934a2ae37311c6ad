use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Free-form entry metadata (agent, tags, connector provenance).
pub type Metadata = BTreeMap<String, String>;

/// Per-entry invalidation hook: returns `true` while the entry is still
/// valid. Evaluated on every unexpired `get`.
type InvalidationHook = Box<dyn Fn(&Value) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FederationConfig {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Outcome of a cache lookup. `found` is the hit flag; `expired` and
/// `invalidated` qualify why a miss happened.
#[derive(Debug, Clone, Default)]
pub struct CacheLookup {
    pub response: Option<Value>,
    pub found: bool,
    pub expired: bool,
    pub invalidated: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub current_size: usize,
    pub max_reached: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: String,
    pub response: Value,
    pub metadata: Metadata,
    pub created_at: u64,
    pub last_accessed: u64,
    pub access_count: u64,
    pub connector_fingerprint: String,
}

struct Entry {
    response: Value,
    metadata: Metadata,
    created_at: u64,
    last_accessed: u64,
    access_count: u64,
    fingerprint: String,
}

/// Content-addressed cache of assembled search responses.
///
/// Strict LRU: every `get` promotes the entry, eviction removes the least
/// recently accessed entry inside the same critical section that would
/// breach `max_entries`. TTL expiry is lazy on `get` and counts as both a
/// miss and an invalidation. Entries and hooks share one mutex; statistics
/// use their own so reading stats never blocks retrieval.
pub struct FederationCache {
    inner: Mutex<Inner>,
    stats: Mutex<CacheStats>,
    ttl: Duration,
}

struct Inner {
    entries: LruCache<String, Entry>,
    hooks: BTreeMap<String, InvalidationHook>,
}

impl FederationCache {
    #[must_use]
    pub fn new(config: FederationConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hooks: BTreeMap::new(),
            }),
            stats: Mutex::new(CacheStats::default()),
            ttl: config.ttl,
        }
    }

    pub fn get(&self, key: &str) -> CacheLookup {
        let mut guard = self.lock_inner();
        let now = unix_ms();
        let inner = &mut *guard;

        // `get_mut` promotes the entry to MRU (strict LRU on access).
        let Some(entry) = inner.entries.get_mut(key) else {
            drop(guard);
            self.bump(|stats| stats.misses += 1);
            return CacheLookup::default();
        };

        if now.saturating_sub(entry.created_at) > self.ttl.as_millis() as u64 {
            inner.entries.pop(key);
            inner.hooks.remove(key);
            let size = inner.entries.len();
            drop(guard);
            self.bump(|stats| {
                stats.misses += 1;
                stats.invalidations += 1;
                stats.current_size = size;
            });
            return CacheLookup {
                expired: true,
                invalidated: true,
                ..CacheLookup::default()
            };
        }

        if let Some(hook) = inner.hooks.get(key) {
            if !hook(&entry.response) {
                inner.entries.pop(key);
                inner.hooks.remove(key);
                let size = inner.entries.len();
                drop(guard);
                self.bump(|stats| {
                    stats.misses += 1;
                    stats.invalidations += 1;
                    stats.current_size = size;
                });
                return CacheLookup {
                    invalidated: true,
                    ..CacheLookup::default()
                };
            }
        }

        entry.last_accessed = now;
        entry.access_count += 1;
        let response = entry.response.clone();
        drop(guard);

        self.bump(|stats| stats.hits += 1);
        CacheLookup {
            response: Some(response),
            found: true,
            expired: false,
            invalidated: false,
        }
    }

    pub fn set(&self, key: &str, response: Value, metadata: Metadata, fingerprint: &str) {
        let now = unix_ms();
        let entry = Entry {
            response,
            metadata,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            fingerprint: fingerprint.to_string(),
        };

        let mut inner = self.lock_inner();
        let evicted = inner.entries.push(key.to_string(), entry);
        let evicted_other = matches!(&evicted, Some((old_key, _)) if old_key != key);
        if let Some((old_key, _)) = &evicted {
            if old_key != key {
                inner.hooks.remove(old_key);
            }
        }
        let size = inner.entries.len();
        drop(inner);

        self.bump(|stats| {
            if evicted_other {
                stats.evictions += 1;
            }
            stats.current_size = size;
            stats.max_reached = stats.max_reached.max(size);
        });
    }

    /// Remove one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.lock_inner();
        inner.hooks.remove(key);
        let removed = inner.entries.pop(key).is_some();
        let size = inner.entries.len();
        drop(inner);
        if removed {
            self.bump(|stats| {
                stats.invalidations += 1;
                stats.current_size = size;
            });
        }
        removed
    }

    pub fn invalidate_all(&self) -> usize {
        let mut inner = self.lock_inner();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.hooks.clear();
        drop(inner);
        self.bump(|stats| {
            stats.invalidations += count as u64;
            stats.current_size = 0;
        });
        count
    }

    /// A connector change invalidates every entry assembled from connector
    /// data, i.e. every entry carrying a non-empty fingerprint.
    pub fn invalidate_by_connector_change(&self, changed_ids: &[String]) -> usize {
        log::debug!("federation cache: connector change {changed_ids:?}");
        self.purge(|entry| !entry.fingerprint.is_empty())
    }

    /// Purge entries whose stored fingerprint differs from the current one.
    /// Entries written without a fingerprint are exempt.
    pub fn invalidate_by_fingerprint(&self, current: &str) -> usize {
        self.purge(|entry| !entry.fingerprint.is_empty() && entry.fingerprint != current)
    }

    pub fn register_invalidation_hook<F>(&self, key: &str, hook: F)
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.lock_inner().hooks.insert(key.to_string(), Box::new(hook));
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Serialisable view of every live entry, LRU order not preserved.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PersistedEntry> {
        let inner = self.lock_inner();
        inner
            .entries
            .iter()
            .map(|(key, entry)| PersistedEntry {
                key: key.clone(),
                response: entry.response.clone(),
                metadata: entry.metadata.clone(),
                created_at: entry.created_at,
                last_accessed: entry.last_accessed,
                access_count: entry.access_count,
                connector_fingerprint: entry.fingerprint.clone(),
            })
            .collect()
    }

    /// Reload persisted entries, oldest access first so recency survives.
    pub fn restore(&self, mut entries: Vec<PersistedEntry>) {
        entries.sort_by_key(|entry| entry.last_accessed);
        let mut inner = self.lock_inner();
        for persisted in entries {
            inner.entries.push(
                persisted.key,
                Entry {
                    response: persisted.response,
                    metadata: persisted.metadata,
                    created_at: persisted.created_at,
                    last_accessed: persisted.last_accessed,
                    access_count: persisted.access_count,
                    fingerprint: persisted.connector_fingerprint,
                },
            );
        }
        let size = inner.entries.len();
        drop(inner);
        self.bump(|stats| {
            stats.current_size = size;
            stats.max_reached = stats.max_reached.max(size);
        });
    }

    fn purge<F: Fn(&Entry) -> bool>(&self, doomed: F) -> usize {
        let mut inner = self.lock_inner();
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| doomed(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            inner.entries.pop(key);
            inner.hooks.remove(key);
        }
        let size = inner.entries.len();
        let count = keys.len();
        drop(inner);
        if count > 0 {
            self.bump(|stats| {
                stats.invalidations += count as u64;
                stats.current_size = size;
            });
        }
        count
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn bump<F: FnOnce(&mut CacheStats)>(&self, update: F) {
        // Statistics are fail-open: a poisoned stats lock never breaks
        // retrieval.
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        update(&mut stats);
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(max_entries: usize) -> FederationCache {
        FederationCache::new(FederationConfig {
            max_entries,
            ttl: Duration::from_secs(60),
        })
    }

    fn meta() -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("tag".into(), "search".into());
        metadata
    }

    #[test]
    fn round_trip_within_ttl() {
        let cache = cache(4);
        cache.set("k", json!({"results": [1, 2]}), meta(), "fp1");

        let lookup = cache.get("k");
        assert!(lookup.found);
        assert!(!lookup.expired);
        assert!(!lookup.invalidated);
        assert_eq!(lookup.response, Some(json!({"results": [1, 2]})));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn miss_is_counted() {
        let cache = cache(4);
        let lookup = cache.get("absent");
        assert!(!lookup.found);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn lru_eviction_respects_recency() {
        let cache = cache(2);
        cache.set("k1", json!(1), meta(), "fp");
        cache.set("k2", json!(2), meta(), "fp");
        assert!(cache.get("k1").found); // k1 becomes MRU
        cache.set("k3", json!(3), meta(), "fp"); // evicts k2

        assert!(!cache.get("k2").found);
        assert!(cache.get("k1").found);
        assert!(cache.get("k3").found);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn size_never_exceeds_max_entries() {
        let cache = cache(3);
        for i in 0..20 {
            cache.set(&format!("k{i}"), json!(i), meta(), "fp");
            assert!(cache.stats().current_size <= 3);
        }
        assert_eq!(cache.stats().max_reached, 3);
    }

    #[test]
    fn ttl_expiry_counts_miss_and_invalidation() {
        let cache = FederationCache::new(FederationConfig {
            max_entries: 4,
            ttl: Duration::from_millis(1),
        });
        cache.set("k", json!(1), meta(), "fp");
        std::thread::sleep(Duration::from_millis(10));

        let lookup = cache.get("k");
        assert!(!lookup.found);
        assert!(lookup.expired);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.invalidations, 1);
        assert_eq!(stats.current_size, 0);

        // Gone entirely, not just flagged.
        assert!(!cache.get("k").found);
    }

    #[test]
    fn fingerprint_invalidation_purges_stale_entries_only() {
        let cache = cache(8);
        cache.set("old", json!(1), meta(), "fp-old");
        cache.set("new", json!(2), meta(), "fp-new");
        cache.set("local", json!(3), meta(), "");

        let purged = cache.invalidate_by_fingerprint("fp-new");
        assert_eq!(purged, 1);
        assert!(!cache.get("old").found);
        assert!(cache.get("new").found);
        assert!(cache.get("local").found);
    }

    #[test]
    fn connector_change_purges_connector_backed_entries() {
        let cache = cache(8);
        cache.set("federated", json!(1), meta(), "fp");
        cache.set("local", json!(2), meta(), "");

        let purged = cache.invalidate_by_connector_change(&["github".into()]);
        assert_eq!(purged, 1);
        assert!(!cache.get("federated").found);
        assert!(cache.get("local").found);
    }

    #[test]
    fn hooks_invalidate_on_get() {
        let cache = cache(4);
        cache.set("k", json!({"generation": 1}), meta(), "fp");
        cache.register_invalidation_hook("k", |response| {
            response.get("generation").and_then(|g| g.as_i64()) == Some(2)
        });

        let lookup = cache.get("k");
        assert!(!lookup.found);
        assert!(lookup.invalidated);
        assert!(!lookup.expired);
        assert!(!cache.get("k").found);
    }

    #[test]
    fn invalidate_all_empties_the_cache() {
        let cache = cache(4);
        cache.set("a", json!(1), meta(), "fp");
        cache.set("b", json!(2), meta(), "fp");
        assert_eq!(cache.invalidate_all(), 2);
        assert_eq!(cache.stats().current_size, 0);
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let c = cache(4);
        c.set("a", json!({"x": 1}), meta(), "fp");
        c.get("a");

        let snapshot = c.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].access_count, 1);
        assert!(snapshot[0].created_at <= snapshot[0].last_accessed);

        let reloaded = cache(4);
        reloaded.restore(snapshot);
        let lookup = reloaded.get("a");
        assert!(lookup.found);
        assert_eq!(lookup.response, Some(json!({"x": 1})));
    }
}
