//! Process-local TTL cache.
//!
//! Keyed by `(source, key)` tuples so unrelated lookup families (e.g. Cymru
//! ASN lookups vs. PeeringDB org lookups) never collide in the same map.
//! Stores negative/empty results too — the point is to avoid a second
//! outbound request within the TTL, not to avoid caching "nothing".

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A TTL cache namespaced by an arbitrary key type `K`.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: DashMap<K, Entry<V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Return the cached value for `key` if present and not yet expired.
    /// Expired entries are removed lazily on read.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove(key);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Fetch-or-populate: returns the cached value if fresh, otherwise calls
    /// `compute` and caches its result (including an "empty" result).
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = V>,
    {
        if let Some(v) = self.get(&key) {
            return v;
        }
        let value = compute().await;
        self.insert(key, value.clone());
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_returned_without_recomputation() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("1.1.1.1".into(), 13335);
        assert_eq!(cache.get(&"1.1.1.1".to_string()), Some(13335));
    }

    #[test]
    fn expired_entry_is_evicted_and_returns_none() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_millis(10));
        cache.insert("1.1.1.1".into(), 13335);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&"1.1.1.1".to_string()), None);
    }

    #[test]
    fn negative_results_are_cached_too() {
        let cache: TtlCache<String, Option<i32>> = TtlCache::new(Duration::from_secs(60));
        cache.insert("10.0.0.1".into(), None);
        assert_eq!(cache.get(&"10.0.0.1".to_string()), Some(None));
    }

    #[tokio::test]
    async fn get_or_compute_only_computes_once_per_ttl() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = AtomicU32::new(0);
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_secs(60));

        let first = cache
            .get_or_compute("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                42
            })
            .await;
        let second = cache
            .get_or_compute("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                99
            })
            .await;

        assert_eq!(first, 42);
        assert_eq!(second, 42, "second call must hit the cache, not recompute");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
