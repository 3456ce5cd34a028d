//! Expiring result cache
//!
//! ## Usage
//!
//! ```rust
//! use route_risk_orchestrator::cache::TtlCache;
//! use std::time::Duration;
//!
//! let cache: TtlCache<String, u32> = TtlCache::new("weather", Duration::from_secs(600), 1000);
//!
//! cache.set("110105".to_string(), 21);
//! assert_eq!(cache.get(&"110105".to_string()), Some(21));
//! ```

use crate::metrics;
use dashmap::DashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Cache entry with its insertion time
#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// In-memory cache whose entries are served only while younger than `ttl`.
#[derive(Clone)]
pub struct TtlCache<K, V> {
    name: &'static str,
    store: Arc<DashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Create a cache.
    ///
    /// - `name`: label used in logs and metrics
    /// - `ttl`: how long a stored value stays servable
    /// - `max_entries`: capacity; `0` means unbounded
    pub fn new(name: &'static str, ttl: Duration, max_entries: usize) -> Self {
        Self {
            name,
            store: Arc::new(DashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Get the cached value if present and `now - stored_at < ttl`.
    ///
    /// Expired entries are removed on read.
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.store.get(key) {
            if entry.stored_at.elapsed() < self.ttl {
                debug!(cache = self.name, key = ?key, "cache hit");
                metrics::inc_cache_event(self.name, "hit");
                return Some(entry.value.clone());
            }
            // Expired
            drop(entry);
            self.store.remove(key);
            debug!(cache = self.name, key = ?key, "cache entry expired");
            metrics::inc_cache_event(self.name, "expired");
        }
        debug!(cache = self.name, key = ?key, "cache miss");
        metrics::inc_cache_event(self.name, "miss");
        None
    }

    /// Store a value stamped with the current time.
    pub fn set(&self, key: K, value: V) {
        // Evict the oldest entry if at capacity
        if self.max_entries > 0
            && self.store.len() >= self.max_entries
            && !self.store.contains_key(&key)
        {
            // Collect the key first to release all DashMap read-guards
            // before calling remove (avoids shard deadlock).
            let evict_key = self
                .store
                .iter()
                .min_by_key(|e| e.stored_at)
                .map(|e| e.key().clone());
            if let Some(key_to_evict) = evict_key {
                self.store.remove(&key_to_evict);
                metrics::inc_cache_event(self.name, "evicted");
            }
        }

        debug!(cache = self.name, key = ?key, ttl_secs = self.ttl.as_secs(), "cached");
        self.store.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Remove a single entry.
    pub fn remove(&self, key: &K) {
        self.store.remove(key);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.store.clear();
        debug!(cache = self.name, "cache cleared");
    }

    /// Number of stored entries, expired ones included until next read.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Snapshot of cache size and configuration.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name,
            entries: self.store.len(),
            ttl: self.ttl,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Label of the cache.
    pub name: &'static str,
    /// Number of entries currently held.
    pub entries: usize,
    /// Configured time-to-live.
    pub ttl: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_secs: u64, max: usize) -> TtlCache<String, String> {
        TtlCache::new("test", Duration::from_secs(ttl_secs), max)
    }

    #[tokio::test]
    async fn test_set_then_get_returns_value() {
        let cache = cache(600, 10);
        cache.set("key1".into(), "value1".into());
        assert_eq!(cache.get(&"key1".into()), Some("value1".to_string()));
        assert_eq!(cache.get(&"key2".into()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = cache(600, 10);
        cache.set("weather".into(), "sunny".into());

        tokio::time::advance(Duration::from_secs(599)).await;
        assert_eq!(cache.get(&"weather".into()), Some("sunny".to_string()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&"weather".into()), None);
        assert!(cache.is_empty(), "expired entry must be removed on read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_refreshes_timestamp() {
        let cache = cache(10, 10);
        cache.set("k".into(), "old".into());
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set("k".into(), "new".into());
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(&"k".into()), Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_eviction_at_capacity() {
        let cache = cache(600, 3);
        cache.set("a".into(), "1".into());
        cache.set("b".into(), "2".into());
        cache.set("c".into(), "3".into());
        cache.set("d".into(), "4".into());

        assert_eq!(cache.len(), 3, "cache must not exceed capacity");
        assert_eq!(cache.get(&"d".into()), Some("4".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_drops_oldest_entry() {
        let cache = cache(600, 3);
        for key in ["a", "b", "c"] {
            cache.set(key.into(), key.into());
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        // Refreshing "a" makes "b" the oldest.
        cache.set("a".into(), "a2".into());
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set("d".into(), "d".into());

        assert_eq!(cache.get(&"b".into()), None);
        assert_eq!(cache.get(&"a".into()), Some("a2".to_string()));
        assert_eq!(cache.get(&"c".into()), Some("c".to_string()));
        assert_eq!(cache.get(&"d".into()), Some("d".to_string()));
    }

    #[tokio::test]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let cache = cache(600, 2);
        cache.set("a".into(), "1".into());
        cache.set("b".into(), "2".into());
        cache.set("a".into(), "3".into());
        assert_eq!(cache.get(&"a".into()), Some("3".to_string()));
        assert_eq!(cache.get(&"b".into()), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_zero_capacity_means_unbounded() {
        let cache = cache(600, 0);
        for i in 0..50 {
            cache.set(format!("k{i}"), format!("v{i}"));
        }
        assert_eq!(cache.len(), 50);
    }

    #[tokio::test]
    async fn test_clear_removes_all_entries() {
        let cache = cache(600, 100);
        for i in 0..10 {
            cache.set(format!("k{i}"), format!("v{i}"));
        }
        assert_eq!(cache.stats().entries, 10);
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let cache = cache(600, 10);
        let other = cache.clone();
        other.set("shared".into(), "yes".into());
        assert_eq!(cache.get(&"shared".into()), Some("yes".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_access_no_corruption() {
        let cache = cache(600, 1000);
        let mut handles = Vec::new();

        for i in 0..10 {
            let c = cache.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..50 {
                    c.set(format!("task-{i}-key-{j}"), format!("val-{i}-{j}"));
                    let _ = c.get(&format!("task-{i}-key-{j}"));
                }
            }));
        }

        for h in handles {
            h.await.unwrap_or(());
        }

        assert!(cache.len() <= 1000);
        assert_eq!(cache.stats().name, "test");
    }
}
