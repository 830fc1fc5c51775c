//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `tollgate_core::api` instead of reaching into internal modules.

pub use crate::breaker::{BreakerError, BreakerStatus, CircuitBreaker, CircuitState};
pub use crate::cache::{CacheStats, TtlCache};
pub use crate::config::{
    get_tollgate_data_dir, load_default, load_from_path, AppConfig, BreakerConfig, CacheConfig,
    ChannelConfig, CleanupConfig, LoggingConfig, MemoryConfig, RetryConfig, RunnerConfig,
    StorageConfig,
};
pub use crate::context::{AppContext, PayloadCache, Services, ServicesFactory};
pub use crate::dedupe::{DedupeHandle, Deduplicator};
pub use crate::error::{CliError, ErrorCode, GovernorError, StoreError};
pub use crate::facade::RateLimitedFacade;
pub use crate::limiter::{ChannelLimiter, ChannelRegistry, LimiterStats};
pub use crate::memory::{
    ManualProbe, MemoryEvent, MemoryGovernor, MemoryHealth, MemoryProbe, MemoryReading,
    MemorySample, MemoryStats, MemoryThresholds, ReclaimHook, SysinfoProbe,
};
pub use crate::retry::{retry, retry_with, AttemptCap, BackoffStrategy, RetryObserver, RetryPolicy};
pub use crate::runner::{
    BoundedWorkRunner, Completed, ItemFailure, RunnerOptions, StreamOutcome,
};
pub use crate::store::{
    entry_size, CleanupPolicy, CleanupReport, KeyLockGuard, KeyLocks, KvBackend, MemoryBackend,
    QuotaKeyedStore, QuotaUsage,
};
