use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::CleanupConfig;
use crate::error::StoreError;

use super::backend::{entry_size, KvBackend};

/// What one cleanup pass freed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed_keys: usize,
    pub pruned_entries: usize,
    pub bytes_freed: u64,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.removed_keys == 0 && self.pruned_entries == 0
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "removed {} keys, pruned {} entries, freed {} bytes",
            self.removed_keys, self.pruned_entries, self.bytes_freed
        )
    }
}

/// Eviction rules applied when the quota runs short.
#[derive(Debug, Clone)]
pub struct CleanupPolicy {
    max_age: chrono::Duration,
    timestamped_keys: Vec<String>,
    capped_logs: Vec<(String, usize)>,
    volatile_prefixes: Vec<String>,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self::from(&CleanupConfig::default())
    }
}

impl From<&CleanupConfig> for CleanupPolicy {
    fn from(cfg: &CleanupConfig) -> Self {
        Self {
            max_age: chrono::Duration::days(i64::from(cfg.max_age_days)),
            timestamped_keys: cfg.timestamped_keys.clone(),
            capped_logs: cfg
                .capped_logs
                .iter()
                .map(|(k, cap)| (k.clone(), *cap))
                .collect(),
            volatile_prefixes: cfg.volatile_prefixes.clone(),
        }
    }
}

/// `timestamp` as RFC 3339 text or epoch milliseconds.
fn parse_timestamp(item: &Value) -> Option<DateTime<Utc>> {
    match item.get("timestamp")? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        _ => None,
    }
}

fn read_array(backend: &dyn KvBackend, key: &str) -> Result<Option<(String, Vec<Value>)>, StoreError> {
    let Some(raw) = backend.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(items)) => Ok(Some((raw, items))),
        _ => {
            tracing::debug!(key, "cleanup skipped key that is not a JSON array");
            Ok(None)
        }
    }
}

impl CleanupPolicy {
    pub fn is_volatile(&self, key: &str) -> bool {
        self.volatile_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    /// Apply every rule against `backend` as of `now`.
    pub fn apply(&self, backend: &dyn KvBackend, now: DateTime<Utc>) -> Result<CleanupReport, StoreError> {
        let mut report = CleanupReport::default();

        for key in &self.timestamped_keys {
            let Some((raw, items)) = read_array(backend, key)? else {
                continue;
            };
            let before = items.len();
            // Entries without a readable timestamp cannot be aged and go too.
            let kept: Vec<Value> = items
                .into_iter()
                .filter(|item| parse_timestamp(item).is_some_and(|ts| now - ts < self.max_age))
                .collect();
            if kept.len() < before {
                report.pruned_entries += before - kept.len();
                self.rewrite(backend, key, &raw, &kept, &mut report)?;
            }
        }

        for (key, cap) in &self.capped_logs {
            let Some((raw, mut items)) = read_array(backend, key)? else {
                continue;
            };
            // Stored newest first.
            if items.len() > *cap {
                report.pruned_entries += items.len() - cap;
                items.truncate(*cap);
                self.rewrite(backend, key, &raw, &items, &mut report)?;
            }
        }

        if !self.volatile_prefixes.is_empty() {
            for (key, value) in backend.entries()? {
                if self.is_volatile(&key) {
                    backend.remove(&key)?;
                    report.removed_keys += 1;
                    report.bytes_freed += entry_size(&key, &value);
                }
            }
        }

        tracing::info!(
            removed_keys = report.removed_keys,
            pruned_entries = report.pruned_entries,
            bytes_freed = report.bytes_freed,
            "storage cleanup complete"
        );
        Ok(report)
    }

    fn rewrite(
        &self,
        backend: &dyn KvBackend,
        key: &str,
        old: &str,
        items: &[Value],
        report: &mut CleanupReport,
    ) -> Result<(), StoreError> {
        let new = serde_json::to_string(items)?;
        backend.set(key, &new)?;
        report.bytes_freed += old.len().saturating_sub(new.len()) as u64;
        Ok(())
    }
}
