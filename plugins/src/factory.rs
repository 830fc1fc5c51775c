use std::sync::Arc;
use std::time::Duration;

use tollgate_core::api::{
    AppConfig, BackoffStrategy, BoundedWorkRunner, ChannelRegistry, CircuitBreaker,
    GovernorError, KvBackend, MemoryBackend, MemoryGovernor, PayloadCache, QuotaKeyedStore,
    RateLimitedFacade, RetryConfig, RetryPolicy, SysinfoProbe,
};

use crate::backend::FileBackend;
use crate::strategies::{JitteredBackoffPlugin, LinearRetryPlugin};

/// Storage path that selects the in-process backend instead of a file.
pub const IN_MEMORY_STORE: &str = ":memory:";

pub fn build_retry_strategy(cfg: &RetryConfig) -> Result<Arc<dyn BackoffStrategy>, GovernorError> {
    match cfg.strategy.as_str() {
        "exponential" => Ok(Arc::new(RetryPolicy::from_config(cfg))),
        "exponential-jitter" => Ok(Arc::new(JitteredBackoffPlugin::new(cfg.clone()))),
        "linear" => Ok(Arc::new(LinearRetryPlugin::new(cfg.clone()))),
        other => Err(GovernorError::Config(format!(
            "unknown retry strategy '{other}' (expected exponential, exponential-jitter or linear)"
        ))),
    }
}

pub fn build_facade(cfg: &AppConfig) -> Result<RateLimitedFacade, GovernorError> {
    let registry = ChannelRegistry::from_config(&cfg.channels);
    let strategy = build_retry_strategy(&cfg.retry)?;
    Ok(RateLimitedFacade::new(registry, strategy))
}

pub fn build_memory_governor(cfg: &AppConfig) -> MemoryGovernor {
    MemoryGovernor::new(Arc::new(SysinfoProbe::new()), &cfg.memory)
}

pub fn build_backend(cfg: &AppConfig) -> Result<Arc<dyn KvBackend>, GovernorError> {
    let path = cfg.storage.path.trim();
    if path.is_empty() || path == IN_MEMORY_STORE {
        return Ok(Arc::new(MemoryBackend::new()));
    }
    Ok(Arc::new(FileBackend::open_expanded(path)?))
}

pub fn build_store(cfg: &AppConfig) -> Result<QuotaKeyedStore, GovernorError> {
    let backend = build_backend(cfg)?;
    Ok(QuotaKeyedStore::from_config(backend, &cfg.storage))
}

pub fn build_runner(cfg: &AppConfig, memory: MemoryGovernor) -> BoundedWorkRunner {
    BoundedWorkRunner::from_config(memory, &cfg.runner)
}

pub fn build_cache(cfg: &AppConfig) -> Arc<PayloadCache> {
    Arc::new(PayloadCache::from_config(&cfg.cache))
}

pub fn build_breaker(cfg: &AppConfig, name: &str) -> CircuitBreaker {
    CircuitBreaker::from_config(name, &cfg.breaker)
}

/// Monitoring interval from config; zero disables the background monitor.
pub fn monitor_interval(cfg: &AppConfig) -> Option<Duration> {
    match cfg.memory.monitor_interval_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    }
}
