//! Reclaim hooks the memory governor runs under pressure.

use std::sync::Arc;

use async_trait::async_trait;
use tollgate_core::api::{PayloadCache, QuotaKeyedStore, ReclaimHook};

/// Rough per-entry footprint used to report what dropping the cache freed.
pub const DEFAULT_CACHE_ENTRY_BYTES: u64 = 4 * 1024;

/// Drops the payload cache: expired entries first, then everything else.
pub struct CacheReclaimHook {
    cache: Arc<PayloadCache>,
    entry_bytes: u64,
}

impl CacheReclaimHook {
    pub fn new(cache: Arc<PayloadCache>) -> Self {
        Self {
            cache,
            entry_bytes: DEFAULT_CACHE_ENTRY_BYTES,
        }
    }

    pub fn with_entry_bytes(mut self, bytes: u64) -> Self {
        self.entry_bytes = bytes;
        self
    }
}

#[async_trait]
impl ReclaimHook for CacheReclaimHook {
    fn name(&self) -> &str {
        "payload-cache"
    }

    async fn reclaim(&self) -> u64 {
        let expired = self.cache.purge_expired();
        let live = self.cache.clear();
        tracing::debug!(expired, live, "payload cache dropped");
        ((expired + live) as u64).saturating_mul(self.entry_bytes)
    }
}

/// Runs the store's eviction rules.
pub struct StoreCleanupHook {
    store: QuotaKeyedStore,
}

impl StoreCleanupHook {
    pub fn new(store: QuotaKeyedStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReclaimHook for StoreCleanupHook {
    fn name(&self) -> &str {
        "store-cleanup"
    }

    async fn reclaim(&self) -> u64 {
        match self.store.cleanup().await {
            Ok(report) => report.bytes_freed,
            Err(e) => {
                tracing::warn!(error = %e, "store cleanup during reclaim failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tollgate_core::api::{CleanupPolicy, KeyLocks, KvBackend, MemoryBackend};

    #[tokio::test(start_paused = true)]
    async fn cache_hook_empties_cache() {
        let cache = Arc::new(PayloadCache::new(16, Duration::from_secs(60)));
        cache.insert("a", serde_json::json!({"id": 1}));
        cache.insert_with_ttl("b", serde_json::json!(2), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let hook = CacheReclaimHook::new(cache.clone()).with_entry_bytes(100);
        assert_eq!(hook.reclaim().await, 200);
        assert!(cache.is_empty());
        assert_eq!(hook.reclaim().await, 0);
    }

    #[tokio::test]
    async fn store_hook_reports_freed_bytes() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("temp_upload", "0123456789").unwrap();
        backend.set("profile", "keep").unwrap();
        let store = QuotaKeyedStore::new(
            backend.clone(),
            1024,
            KeyLocks::new(None, None),
            CleanupPolicy::default(),
        );

        let hook = StoreCleanupHook::new(store);
        assert_eq!(hook.reclaim().await, 21);
        assert_eq!(backend.keys().unwrap(), vec!["profile"]);
    }
}
