#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tollgate_core::api::{
    ChannelConfig, ChannelRegistry, ManualProbe, MemoryConfig, MemoryGovernor, RateLimitedFacade,
    RetryPolicy,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("tollgate_core=debug")
        .try_init();
}

pub fn facade(channels: &[(&str, usize, u64)]) -> RateLimitedFacade {
    let registry = channels
        .iter()
        .fold(ChannelRegistry::default(), |reg, (name, max, delay)| {
            reg.with_channel(*name, ChannelConfig::new(*max, *delay))
        });
    let policy = RetryPolicy::default()
        .with_max_retries(3)
        .with_initial_delay(Duration::from_millis(100));
    RateLimitedFacade::with_policy(registry, policy)
}

pub fn governor(max_memory_mb: u64, used_mb: u64) -> (MemoryGovernor, Arc<ManualProbe>) {
    let probe = Arc::new(ManualProbe::with_used_mb(used_mb));
    let cfg = MemoryConfig {
        max_memory_mb,
        ..MemoryConfig::default()
    };
    (MemoryGovernor::new(probe.clone(), &cfg), probe)
}
