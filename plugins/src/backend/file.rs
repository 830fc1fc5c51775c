//! JSON-file key-value backend.
//!
//! The whole map lives in memory and is rewritten on every mutation through a
//! temp file in the same directory, so a crash never leaves a torn file.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tempfile::NamedTempFile;
use tollgate_core::api::{entry_size, KvBackend, StoreError};

pub struct FileBackend {
    path: PathBuf,
    map: Mutex<BTreeMap<String, String>>,
    host_capacity: Option<u64>,
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("host_capacity", &self.host_capacity)
            .finish()
    }
}

impl FileBackend {
    /// Open `path`, treating a missing file as an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let map = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                StoreError::Backend(format!("corrupt store file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), entries = map.len(), "file store opened");
        Ok(Self {
            path,
            map: Mutex::new(map),
            host_capacity: None,
        })
    }

    /// Open a configured path, expanding `~` and environment variables.
    pub fn open_expanded(path: &str) -> Result<Self, StoreError> {
        let expanded = shellexpand::full(path)
            .map_err(|e| StoreError::Backend(format!("cannot expand store path '{path}': {e}")))?;
        Self::open(PathBuf::from(expanded.as_ref()))
    }

    /// Refuse writes past `bytes` with [`StoreError::HostQuota`], like a
    /// size-limited host store would.
    pub fn with_host_capacity(mut self, bytes: u64) -> Self {
        self.host_capacity = Some(bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn map(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, map)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error.to_string()))?;
        Ok(())
    }
}

impl KvBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
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
                    "{} full ({capacity} bytes)",
                    self.path.display()
                )));
            }
        }
        let previous = map.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&map) {
            // Keep memory in step with disk.
            match previous {
                Some(old) => map.insert(key.to_string(), old),
                None => map.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.map();
        let Some(old) = map.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&map) {
            map.insert(key.to_string(), old);
            return Err(e);
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let backend = FileBackend::open(&path).unwrap();
        assert!(backend.entries().unwrap().is_empty());
        backend.set("profile", "{\"name\":\"ada\"}").unwrap();
        backend.set("temp_x", "1").unwrap();
        backend.remove("temp_x").unwrap();
        backend.remove("never_there").unwrap();

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.keys().unwrap(), vec!["profile"]);
        assert_eq!(
            reopened.get("profile").unwrap().as_deref(),
            Some("{\"name\":\"ada\"}")
        );
    }

    #[test]
    fn host_capacity_refuses_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let backend = FileBackend::open(&path).unwrap().with_host_capacity(10);

        backend.set("ab", "cdef").unwrap();
        let err = backend.set("gh", "ijklmn").unwrap_err();
        assert!(matches!(err, StoreError::HostQuota(_)));

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.keys().unwrap(), vec!["ab"]);
    }

    #[test]
    fn corrupt_file_is_a_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(FileBackend::open(&path), Err(StoreError::Backend(_))));
    }
}
