use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GovernorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Channel name -> limits. Editing this table never touches the limiter code.
    #[serde(default = "default_channels")]
    pub channels: BTreeMap<String, ChannelConfig>,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            retry: RetryConfig::default(),
            channels: default_channels(),
            memory: MemoryConfig::default(),
            runner: RunnerConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reject values that would break the limiter, retrier or governor invariants.
    pub fn validate(&self) -> Result<(), GovernorError> {
        for (name, channel) in &self.channels {
            if channel.max_concurrent < 1 {
                return Err(GovernorError::Config(format!(
                    "channel '{name}': max_concurrent must be at least 1"
                )));
            }
        }
        if self.retry.max_attempts < 1 {
            return Err(GovernorError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier <= 1.0 {
            return Err(GovernorError::Config(
                "retry.backoff_multiplier must be greater than 1".into(),
            ));
        }
        let m = &self.memory;
        if !(m.warning > 0.0 && m.warning < m.critical && m.critical <= 1.0) {
            return Err(GovernorError::Config(format!(
                "memory thresholds must satisfy 0 < warning ({}) < critical ({}) <= 1",
                m.warning, m.critical
            )));
        }
        if m.max_memory_mb == 0 {
            return Err(GovernorError::Config(
                "memory.max_memory_mb must be positive".into(),
            ));
        }
        if self.storage.max_size_bytes == 0 {
            return Err(GovernorError::Config(
                "storage.max_size_bytes must be positive".into(),
            ));
        }
        if self.runner.batch_size == 0 || self.runner.stream_concurrency == 0 {
            return Err(GovernorError::Config(
                "runner.batch_size and runner.stream_concurrency must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "tollgate_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// "exponential", "exponential-jitter" or "linear".
    #[serde(default = "default_retry_strategy")]
    pub strategy: String,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: default_retry_strategy(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_retry_strategy() -> String {
    "exponential-jitter".to_string()
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub max_concurrent: usize,
    #[serde(default)]
    pub min_delay_ms: u64,
}

impl ChannelConfig {
    pub fn new(max_concurrent: usize, min_delay_ms: u64) -> Self {
        Self {
            max_concurrent,
            min_delay_ms,
        }
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

pub fn default_channels() -> BTreeMap<String, ChannelConfig> {
    [
        ("youtube", ChannelConfig::new(3, 1000)),
        ("unsplash", ChannelConfig::new(2, 2000)),
        ("pexels", ChannelConfig::new(2, 1500)),
        ("copilot", ChannelConfig::new(2, 2000)),
        ("videoGeneration", ChannelConfig::new(1, 5000)),
    ]
    .into_iter()
    .map(|(name, cfg)| (name.to_string(), cfg))
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Ceiling that `percent_used` and the thresholds are relative to.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_warning")]
    pub warning: f64,
    #[serde(default = "default_critical")]
    pub critical: f64,
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    /// Pause after running reclaim hooks, giving freed memory time to settle.
    #[serde(default = "default_reclaim_pause_ms")]
    pub reclaim_pause_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            warning: default_warning(),
            critical: default_critical(),
            monitor_interval_ms: default_monitor_interval_ms(),
            reclaim_pause_ms: default_reclaim_pause_ms(),
        }
    }
}

fn default_max_memory_mb() -> u64 {
    4096
}

fn default_warning() -> f64 {
    0.8
}

fn default_critical() -> f64 {
    0.9
}

fn default_monitor_interval_ms() -> u64 {
    30_000
}

fn default_reclaim_pause_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Memory a single chunk is assumed to need when asking for admission.
    #[serde(default = "default_estimated_batch_mb")]
    pub estimated_batch_mb: f64,
    #[serde(default = "default_batch_pressure_pause_ms")]
    pub batch_pressure_pause_ms: u64,
    #[serde(default = "default_stream_concurrency")]
    pub stream_concurrency: usize,
    #[serde(default = "default_stream_pressure_pause_ms")]
    pub stream_pressure_pause_ms: u64,
    /// Consecutive pressure pauses with nothing in flight before one item is
    /// admitted anyway.
    #[serde(default = "default_stream_max_pressure_pauses")]
    pub stream_max_pressure_pauses: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            estimated_batch_mb: default_estimated_batch_mb(),
            batch_pressure_pause_ms: default_batch_pressure_pause_ms(),
            stream_concurrency: default_stream_concurrency(),
            stream_pressure_pause_ms: default_stream_pressure_pause_ms(),
            stream_max_pressure_pauses: default_stream_max_pressure_pauses(),
        }
    }
}

fn default_batch_size() -> usize {
    3
}

fn default_batch_delay_ms() -> u64 {
    1000
}

fn default_estimated_batch_mb() -> f64 {
    100.0
}

fn default_batch_pressure_pause_ms() -> u64 {
    2000
}

fn default_stream_concurrency() -> usize {
    2
}

fn default_stream_pressure_pause_ms() -> u64 {
    1000
}

fn default_stream_max_pressure_pauses() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
    /// Lock lifetime before it is force-released. `None` disables auto-release.
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: Option<u64>,
    /// Upper bound on waiting for a key lock. `None` waits indefinitely.
    #[serde(default)]
    pub lock_wait_timeout_ms: Option<u64>,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            max_size_bytes: default_max_size_bytes(),
            lock_ttl_ms: default_lock_ttl_ms(),
            lock_wait_timeout_ms: None,
            cleanup: CleanupConfig::default(),
        }
    }
}

fn default_storage_path() -> String {
    "~/.tollgate/store.json".to_string()
}

fn default_max_size_bytes() -> u64 {
    // 4.5 MiB
    4 * 1024 * 1024 + 512 * 1024
}

fn default_lock_ttl_ms() -> Option<u64> {
    Some(5000)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Entries of timestamped lists older than this are dropped.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    /// Keys holding a JSON array of objects with a `timestamp` field.
    #[serde(default = "default_timestamped_keys")]
    pub timestamped_keys: Vec<String>,
    /// Keys holding a newest-first JSON array, capped to the given length.
    #[serde(default = "default_capped_logs")]
    pub capped_logs: BTreeMap<String, usize>,
    /// Keys under these prefixes are purged outright.
    #[serde(default = "default_volatile_prefixes")]
    pub volatile_prefixes: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            timestamped_keys: default_timestamped_keys(),
            capped_logs: default_capped_logs(),
            volatile_prefixes: default_volatile_prefixes(),
        }
    }
}

fn default_max_age_days() -> u32 {
    30
}

fn default_timestamped_keys() -> Vec<String> {
    vec!["notifications".to_string()]
}

fn default_capped_logs() -> BTreeMap<String, usize> {
    BTreeMap::from([("activity_feed".to_string(), 100)])
}

fn default_volatile_prefixes() -> Vec<String> {
    vec!["cache_".to_string(), "temp_".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

fn default_cache_capacity() -> usize {
    512
}

fn default_cache_ttl_ms() -> u64 {
    5 * 60 * 1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_timeout_ms: default_open_timeout_ms(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_open_timeout_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_validate() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.channels["youtube"], ChannelConfig::new(3, 1000));
        assert_eq!(cfg.channels["videoGeneration"], ChannelConfig::new(1, 5000));
        assert_eq!(cfg.storage.max_size_bytes, 4_718_592);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [memory]
            max_memory_mb = 512

            [channels.search]
            max_concurrent = 4
            min_delay_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.memory.max_memory_mb, 512);
        assert_eq!(cfg.memory.warning, 0.8);
        assert_eq!(cfg.channels.len(), 1);
        assert_eq!(cfg.channels["search"].min_delay(), Duration::from_millis(250));
        assert_eq!(cfg.retry.max_attempts, 3);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut cfg = AppConfig::default();
        cfg.memory.warning = 0.95;
        assert!(matches!(cfg.validate(), Err(GovernorError::Config(_))));
    }

    #[test]
    fn rejects_zero_concurrency_and_flat_backoff() {
        let mut cfg = AppConfig::default();
        cfg.channels.insert("bad".into(), ChannelConfig::new(0, 0));
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.retry.backoff_multiplier = 1.0;
        assert!(cfg.validate().is_err());
    }
}
