//! In-flight request de-duplication
//!
//! Caches the pending computation rather than its result: the first caller
//! for a key invokes the factory and stores the resulting future as a
//! [`Shared`] handle; every later caller (whether the computation is still
//! running or already finished) awaits that same handle.
//!
//! ## Usage
//!
//! ```rust
//! use route_risk_orchestrator::cache::InFlightCache;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache: InFlightCache<&'static str, u64> = InFlightCache::new("regeo");
//!
//! let (a, b) = tokio::join!(
//!     cache.get_or_compute("39.904,116.407", || async { 42 }),
//!     cache.get_or_compute("39.904,116.407", || async { 7 }),
//! );
//! assert_eq!((a, b), (42, 42)); // second factory never ran
//! # }
//! ```

use crate::metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

type SharedComputation<V> = Shared<BoxFuture<'static, V>>;

struct Slot<V>
where
    V: Clone,
{
    /// Insertion order, for oldest-first eviction.
    seq: u64,
    computation: SharedComputation<V>,
}

/// Promise-level cache: concurrent callers for one key share one computation.
pub struct InFlightCache<K, V>
where
    V: Clone,
{
    name: &'static str,
    entries: Arc<DashMap<K, Slot<V>>>,
    next_seq: Arc<AtomicU64>,
    max_entries: usize,
}

impl<K, V> Clone for InFlightCache<K, V>
where
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            entries: Arc::clone(&self.entries),
            next_seq: Arc::clone(&self.next_seq),
            max_entries: self.max_entries,
        }
    }
}

impl<K, V> InFlightCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty, unbounded cache labelled `name` for logs and metrics.
    pub fn new(name: &'static str) -> Self {
        Self::bounded(name, 0)
    }

    /// Create a cache holding at most `max_entries` keys (`0` = unbounded).
    ///
    /// At capacity the oldest *finished* computation is dropped to make
    /// room. Pending computations are never evicted, so the cap can be
    /// exceeded briefly while many lookups are in flight.
    pub fn bounded(name: &'static str, max_entries: usize) -> Self {
        Self {
            name,
            entries: Arc::new(DashMap::new()),
            next_seq: Arc::new(AtomicU64::new(0)),
            max_entries,
        }
    }

    /// Return the shared computation for `key`, starting it with `factory`
    /// if no caller has asked for this key yet.
    ///
    /// `factory` is invoked at most once per key for the lifetime of the
    /// entry, no matter how many callers race on it. It only has to build
    /// the future; the future runs when awaited.
    pub async fn get_or_compute<F, Fut>(&self, key: K, factory: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.shared_for(key, factory).await
    }

    fn shared_for<F, Fut>(&self, key: K, factory: F) -> SharedComputation<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        if self.max_entries > 0
            && self.entries.len() >= self.max_entries
            && !self.entries.contains_key(&key)
        {
            self.evict_oldest_finished();
        }

        match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                debug!(cache = self.name, key = ?entry.key(), "joining in-flight computation");
                metrics::inc_cache_event(self.name, "shared");
                entry.get().computation.clone()
            }
            Entry::Vacant(entry) => {
                debug!(cache = self.name, key = ?entry.key(), "starting computation");
                metrics::inc_cache_event(self.name, "started");
                let shared = factory().boxed().shared();
                entry.insert(Slot {
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                    computation: shared.clone(),
                });
                shared
            }
        }
    }

    fn evict_oldest_finished(&self) {
        // Collect the key first so no shard guard is held during remove.
        let oldest = self
            .entries
            .iter()
            .filter(|slot| slot.computation.peek().is_some())
            .min_by_key(|slot| slot.seq)
            .map(|slot| slot.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            metrics::inc_cache_event(self.name, "evicted");
        }
    }

    /// `true` if a computation (pending or finished) is held for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop every entry. Callers already awaiting a computation keep their
    /// handle and still receive its result.
    pub fn clear(&self) {
        self.entries.clear();
        debug!(cache = self.name, "in-flight cache cleared");
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no key is held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, T, E> InFlightCache<K, Result<T, E>>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Like [`get_or_compute`](Self::get_or_compute) for fallible
    /// computations: when the shared computation resolves to `Err`, the entry
    /// is evicted so the next caller starts a fresh attempt instead of
    /// replaying the failure. Callers that were already waiting all receive
    /// the same `Err`.
    pub async fn get_or_try_compute<F, Fut>(&self, key: K, factory: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = self.shared_for(key.clone(), factory);
        let handle = shared.clone();
        let result = shared.await;
        if result.is_err() {
            // Only evict the entry this caller awaited; a newer attempt may
            // already have replaced it.
            self.entries
                .remove_if(&key, |_, current| current.computation.ptr_eq(&handle));
            debug!(cache = self.name, key = ?key, "in-flight computation failed, evicted");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_trigger_factory_once() {
        let cache: InFlightCache<String, u32> = InFlightCache::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("same-key".to_string(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        7
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "factory must run exactly once");
    }

    #[tokio::test]
    async fn test_completed_value_is_reused() {
        let cache: InFlightCache<u8, &'static str> = InFlightCache::new("test");
        let first = cache.get_or_compute(1, || async { "first" }).await;
        let second = cache.get_or_compute(1, || async { "second" }).await;
        assert_eq!(first, "first");
        assert_eq!(second, "first");
    }

    #[tokio::test]
    async fn test_distinct_keys_compute_independently() {
        let cache: InFlightCache<u8, u8> = InFlightCache::new("test");
        let (a, b) = tokio::join!(
            cache.get_or_compute(1, || async { 10 }),
            cache.get_or_compute(2, || async { 20 }),
        );
        assert_eq!((a, b), (10, 20));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_computation_is_evicted_and_retried() {
        let cache: InFlightCache<u8, Result<u8, String>> = InFlightCache::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = calls.clone();
        let first: Result<u8, String> = cache
            .get_or_try_compute(1, move || async move {
                c1.fetch_add(1, Ordering::SeqCst);
                Err("boom".to_string())
            })
            .await;
        assert!(first.is_err());
        assert!(!cache.contains(&1), "failed entry must be evicted");

        let c2 = calls.clone();
        let second: Result<u8, String> = cache
            .get_or_try_compute(1, move || async move {
                c2.fetch_add(1, Ordering::SeqCst);
                Ok(5)
            })
            .await;
        assert_eq!(second, Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.contains(&1), "successful entry must stay cached");
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_one_failure() {
        let cache: InFlightCache<u8, Result<u8, String>> = InFlightCache::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<u8, String>("down".to_string())
            }
        };

        let (a, b) = tokio::join!(
            cache.get_or_try_compute(9, make(calls.clone())),
            cache.get_or_try_compute(9, make(calls.clone())),
        );
        assert!(a.is_err() && b.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_forces_recompute() {
        let cache: InFlightCache<u8, u8> = InFlightCache::new("test");
        assert_eq!(cache.get_or_compute(1, || async { 1 }).await, 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_compute(1, || async { 2 }).await, 2);
    }

    #[tokio::test]
    async fn test_bounded_cache_evicts_oldest_finished_entry() {
        let cache: InFlightCache<u8, u8> = InFlightCache::bounded("test", 2);
        cache.get_or_compute(1, || async { 1 }).await;
        cache.get_or_compute(2, || async { 2 }).await;
        cache.get_or_compute(3, || async { 3 }).await;

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&1), "oldest entry must go first");
        assert!(cache.contains(&2) && cache.contains(&3));
    }

    #[tokio::test]
    async fn test_pending_entries_are_never_evicted() {
        let cache: InFlightCache<u8, u8> = InFlightCache::bounded("test", 1);
        let (tx, rx) = tokio::sync::oneshot::channel::<u8>();
        let pending = cache.get_or_compute(1, move || async move { rx.await.unwrap_or(0) });

        let (first, second) = tokio::join!(pending, async {
            let v = cache.get_or_compute(2, || async { 2 }).await;
            assert!(cache.contains(&1), "pending computation must survive");
            let _ = tx.send(1);
            v
        });
        assert_eq!((first, second), (1, 2));
    }
}
