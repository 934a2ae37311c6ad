use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Provenance of a cached tool output: who asked, what for, and how to
/// invalidate it (tags, content hash of the material it was derived from).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub agent: String,
    pub request: Value,
    pub content_hash: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResultCacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 512,
            ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultCacheStats {
    pub total_entries: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub avg_access_count: f64,
}

struct Entry {
    output: Value,
    metadata: ResultMetadata,
    created_at: u64,
    last_accessed: u64,
    access_count: u64,
}

/// LRU + TTL cache of structured tool outputs, scoped per agent and
/// invalidated by tag, by agent, or by source-content hash.
pub struct ResultCache {
    entries: Mutex<LruCache<String, Entry>>,
    max_entries: usize,
    ttl: Duration,
}

impl ResultCache {
    #[must_use]
    pub fn new(config: ResultCacheConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            max_entries: config.max_entries.max(1),
            ttl: config.ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.lock();
        let now = unix_ms();

        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => now.saturating_sub(entry.created_at) > self.ttl.as_millis() as u64,
        };
        if expired {
            entries.pop(key);
            return None;
        }

        entries.get_mut(key).map(|entry| {
            entry.last_accessed = now;
            entry.access_count += 1;
            entry.output.clone()
        })
    }

    pub fn set(&self, key: &str, output: Value, metadata: ResultMetadata) {
        let now = unix_ms();
        self.lock().push(
            key.to_string(),
            Entry {
                output,
                metadata,
                created_at: now,
                last_accessed: now,
                access_count: 0,
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().pop(key).is_some()
    }

    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        self.purge(|entry| entry.metadata.tags.iter().any(|t| t == tag))
    }

    pub fn invalidate_agent(&self, agent: &str) -> usize {
        self.purge(|entry| entry.metadata.agent == agent)
    }

    pub fn invalidate_by_content_hash(&self, hash: &str) -> usize {
        self.purge(|entry| entry.metadata.content_hash == hash)
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    #[must_use]
    pub fn stats(&self) -> ResultCacheStats {
        let entries = self.lock();
        let total = entries.len();
        let accesses: u64 = entries.iter().map(|(_, entry)| entry.access_count).sum();
        ResultCacheStats {
            total_entries: total,
            max_entries: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
            avg_access_count: if total == 0 {
                0.0
            } else {
                accesses as f64 / total as f64
            },
        }
    }

    fn purge<F: Fn(&Entry) -> bool>(&self, doomed: F) -> usize {
        let mut entries = self.lock();
        let keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| doomed(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(agent: &str, tags: &[&str]) -> ResultMetadata {
        ResultMetadata {
            agent: agent.to_string(),
            request: json!({"query": "q"}),
            content_hash: "hash-a".to_string(),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
        }
    }

    fn cache() -> ResultCache {
        ResultCache::new(ResultCacheConfig {
            max_entries: 4,
            ttl: Duration::from_secs(60),
        })
    }

    #[test]
    fn set_then_get_returns_output() {
        let cache = cache();
        cache.set("k", json!({"answer": 42}), meta("code-analysis", &["search"]));
        assert_eq!(cache.get("k"), Some(json!({"answer": 42})));
    }

    #[test]
    fn ttl_expiry_removes_entry() {
        let cache = ResultCache::new(ResultCacheConfig {
            max_entries: 4,
            ttl: Duration::from_millis(1),
        });
        cache.set("k", json!(1), meta("a", &[]));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn lru_bound_holds() {
        let cache = ResultCache::new(ResultCacheConfig {
            max_entries: 2,
            ttl: Duration::from_secs(60),
        });
        for i in 0..10 {
            cache.set(&format!("k{i}"), json!(i), meta("a", &[]));
            assert!(cache.stats().total_entries <= 2);
        }
    }

    #[test]
    fn tag_and_agent_purges_are_scoped() {
        let cache = cache();
        cache.set("s1", json!(1), meta("code-analysis", &["search"]));
        cache.set("s2", json!(2), meta("debugging", &["search"]));
        cache.set("e1", json!(3), meta("debugging", &["explain"]));

        assert_eq!(cache.invalidate_by_tag("search"), 2);
        assert_eq!(cache.get("s1"), None);
        assert_eq!(cache.get("s2"), None);
        assert_eq!(cache.get("e1"), Some(json!(3)));

        assert_eq!(cache.invalidate_agent("debugging"), 1);
        assert_eq!(cache.get("e1"), None);
    }

    #[test]
    fn content_hash_purge_hits_derived_entries() {
        let cache = cache();
        cache.set("k1", json!(1), meta("a", &[]));
        let mut other = meta("a", &[]);
        other.content_hash = "hash-b".into();
        cache.set("k2", json!(2), other);

        assert_eq!(cache.invalidate_by_content_hash("hash-a"), 1);
        assert_eq!(cache.get("k1"), None);
        assert_eq!(cache.get("k2"), Some(json!(2)));
    }

    #[test]
    fn stats_track_access_counts() {
        let cache = cache();
        cache.set("k", json!(1), meta("a", &[]));
        cache.get("k");
        cache.get("k");

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.max_entries, 4);
        assert_eq!(stats.ttl_secs, 60);
        assert!((stats.avg_access_count - 2.0).abs() < f64::EPSILON);
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
