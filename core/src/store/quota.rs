use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::config::StorageConfig;
use crate::error::StoreError;

use super::backend::{entry_size, KvBackend};
use super::cleanup::{CleanupPolicy, CleanupReport};
use super::lock::KeyLocks;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuotaUsage {
    pub used_bytes: u64,
    pub max_bytes: u64,
    pub remaining_bytes: u64,
    pub percent_used: f64,
    pub entries: usize,
}

impl fmt::Display for QuotaUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} bytes ({:.2}%), {} entries, {} bytes free",
            self.used_bytes, self.max_bytes, self.percent_used, self.entries, self.remaining_bytes
        )
    }
}

struct StoreInner {
    backend: Arc<dyn KvBackend>,
    max_size: u64,
    locks: KeyLocks,
    policy: CleanupPolicy,
    /// Serialises quota check + write across keys so two writers cannot both
    /// pass the check against the same free space.
    write_gate: tokio::sync::Mutex<()>,
}

/// Key-value store that never lets its total size pass `max_size`.
///
/// Sizes are recomputed by scanning the backend, so entries written by other
/// code paths are accounted for too.
#[derive(Clone)]
pub struct QuotaKeyedStore {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for QuotaKeyedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaKeyedStore")
            .field("backend", &self.inner.backend.name())
            .field("max_size", &self.inner.max_size)
            .finish()
    }
}

impl QuotaKeyedStore {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        max_size: u64,
        locks: KeyLocks,
        policy: CleanupPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                max_size,
                locks,
                policy,
                write_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn from_config(backend: Arc<dyn KvBackend>, cfg: &StorageConfig) -> Self {
        let locks = KeyLocks::new(
            cfg.lock_ttl_ms.map(Duration::from_millis),
            cfg.lock_wait_timeout_ms.map(Duration::from_millis),
        );
        Self::new(
            backend,
            cfg.max_size_bytes,
            locks,
            CleanupPolicy::from(&cfg.cleanup),
        )
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    pub fn max_size(&self) -> u64 {
        self.inner.max_size
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.inner.locks
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _lease = self.inner.locks.acquire(key).await?;
        self.inner.backend.get(key)
    }

    /// Write `value`, returning `Ok(false)` when the quota (ours or the
    /// host's) cannot make room even after cleanup.
    pub async fn set(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        match self.try_set(key, value).await {
            Ok(()) => Ok(true),
            Err(StoreError::QuotaExceeded { .. } | StoreError::HostQuota(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Like [`set`](Self::set) but reports a rejected write as an error.
    pub async fn try_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _lease = self.inner.locks.acquire(key).await?;
        let _gate = self.inner.write_gate.lock().await;
        let needed = entry_size(key, value);

        if self.available_for(key)? < needed {
            tracing::warn!(key, needed, "storage quota low, cleaning up");
            self.cleanup_locked()?;
            let available = self.available_for(key)?;
            if available < needed {
                tracing::error!(key, needed, available, "storage quota exceeded even after cleanup");
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available,
                });
            }
        }

        match self.inner.backend.set(key, value) {
            Err(StoreError::HostQuota(msg)) => {
                tracing::warn!(key, error = %msg, "host store refused write, cleaning up");
                self.cleanup_locked()?;
                self.inner.backend.set(key, value).map_err(|e| {
                    tracing::error!(key, error = %e, "write failed even after cleanup");
                    e
                })
            }
            other => other,
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _lease = self.inner.locks.acquire(key).await?;
        self.inner.backend.remove(key)
    }

    pub fn current_size(&self) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .backend
            .entries()?
            .iter()
            .map(|(k, v)| entry_size(k, v))
            .sum())
    }

    pub fn remaining(&self) -> Result<u64, StoreError> {
        Ok(self.inner.max_size.saturating_sub(self.current_size()?))
    }

    /// Would writing `value` under `key` fit without cleanup?
    pub fn can_store(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        Ok(entry_size(key, value) <= self.available_for(key)?)
    }

    pub fn usage(&self) -> Result<QuotaUsage, StoreError> {
        let entries = self.inner.backend.entries()?;
        let used: u64 = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
        let max = self.inner.max_size;
        let percent = if max == 0 {
            0.0
        } else {
            (used as f64 / max as f64 * 10_000.0).round() / 100.0
        };
        Ok(QuotaUsage {
            used_bytes: used,
            max_bytes: max,
            remaining_bytes: max.saturating_sub(used),
            percent_used: percent,
            entries: entries.len(),
        })
    }

    /// Run the eviction rules now.
    pub async fn cleanup(&self) -> Result<CleanupReport, StoreError> {
        let _gate = self.inner.write_gate.lock().await;
        self.cleanup_locked()
    }

    /// Caller holds the write gate. Per-key leases are not taken here: a
    /// writer holding one is already queued on the gate.
    fn cleanup_locked(&self) -> Result<CleanupReport, StoreError> {
        self.inner
            .policy
            .apply(self.inner.backend.as_ref(), Utc::now())
    }

    /// Space left for `key`, counting its current entry as reclaimable.
    fn available_for(&self, key: &str) -> Result<u64, StoreError> {
        let mut others = 0u64;
        for (k, v) in self.inner.backend.entries()? {
            if k != key {
                others += entry_size(&k, &v);
            }
        }
        Ok(self.inner.max_size.saturating_sub(others))
    }
}
