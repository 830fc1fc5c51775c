use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;

/// Size an entry contributes to the quota: key bytes plus value bytes.
pub fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

/// Host persistent key-value store with its own fixed capacity.
///
/// A write the host refuses for lack of space must fail with
/// [`StoreError::HostQuota`] so the store can clean up and retry.
pub trait KvBackend: Send + Sync {
    fn name(&self) -> &str;
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    /// Every entry, ordered by key.
    fn entries(&self) -> Result<Vec<(String, String)>, StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries()?.into_iter().map(|(k, _)| k).collect())
    }
}

/// In-process backend. An optional host capacity makes it refuse writes the
/// way a full browser or embedded store would.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: Mutex<BTreeMap<String, String>>,
    host_capacity: Option<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host_capacity(bytes: u64) -> Self {
        Self {
            map: Mutex::new(BTreeMap::new()),
            host_capacity: Some(bytes),
        }
    }

    fn map(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KvBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.map().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.map();
        if let Some(capacity) = self.host_capacity {
            let others: u64 = map
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| entry_size(k, v))
                .sum();
            if others + entry_size(key, value) > capacity {
                return Err(StoreError::HostQuota(format!(
                    "memory backend full ({capacity} bytes)"
                )));
            }
        }
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.map().remove(key);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .map()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
