//! LRU-bounded keyed cache with per-entry time to live.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lru::LruCache;
use serde::Serialize;
use tokio::time::Instant;

use crate::clock::saturating_after;
use crate::config::CacheConfig;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct TtlCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(cfg: &CacheConfig) -> Self {
        Self::new(cfg.capacity, Duration::from_millis(cfg.ttl_ms))
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh value for `key`; an expired entry is dropped on the way.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries();
        let now = Instant::now();
        let lookup = entries
            .get(key)
            .map(|entry| (entry.expires_at > now).then(|| entry.value.clone()));
        match lookup {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            Some(None) => {
                entries.pop(key);
            }
            None => {}
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: saturating_after(Instant::now(), ttl),
        };
        self.entries().put(key.into(), entry);
    }

    /// Cached value, or the result of `fetch` (cached only on success).
    ///
    /// Concurrent misses each fetch; put a deduplicator in front when that
    /// matters.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            tracing::trace!(key, "cache hit");
            return Ok(value);
        }
        tracing::debug!(key, "cache miss, fetching");
        let value = fetch().await?;
        self.insert_with_ttl(key, value.clone(), ttl.unwrap_or(self.default_ttl));
        Ok(value)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries().pop(key).is_some();
        if removed {
            tracing::debug!(key, "cache entry invalidated");
        }
        removed
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let n = entries.len();
        entries.clear();
        n
    }

    /// Drop every expired entry; returns how many went.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries();
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries();
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = TtlCache::new(8, Duration::from_secs(1));
        cache.insert("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn get_or_fetch_caches_successes_only() {
        let cache: TtlCache<u32> = TtlCache::new(8, Duration::from_secs(60));
        let fetches = AtomicUsize::new(0);

        let err = cache
            .get_or_fetch("k", None, || async { Err::<u32, _>("down") })
            .await;
        assert_eq!(err, Err("down"));

        for _ in 0..3 {
            let v = cache
                .get_or_fetch("k", None, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, &str>(7)
                })
                .await;
            assert_eq!(v, Ok(7));
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_and_capacity_bounds() {
        let cache = TtlCache::new(2, Duration::from_secs(10));
        cache.insert_with_ttl("short", 1, Duration::from_millis(10));
        cache.insert("long", 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.purge_expired(), 1);

        cache.insert("b", 3);
        cache.insert("c", 4);
        // Least recently used ("long") was evicted.
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("long"), None);
        assert!(cache.invalidate("b"));
        assert_eq!(cache.clear(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_ttl_does_not_overflow() {
        let cache = TtlCache::new(8, Duration::from_millis(u64::MAX));
        cache.insert("a", 1);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(cache.get("a"), Some(1));
    }
}
