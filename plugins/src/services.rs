//! ServicesFactory implementation: builds every governor service from config
//! and wires the reclaim hooks, for reuse by the CLI.
use std::sync::Arc;

use async_trait::async_trait;
use tollgate_core::api::{AppConfig, GovernorError, Services, ServicesFactory};

use crate::factory;
use crate::reclaim::{CacheReclaimHook, StoreCleanupHook};

/// Name of the breaker handed out in [`Services`].
pub const DEFAULT_BREAKER: &str = "default";

pub struct PluginServicesFactory;

impl Default for PluginServicesFactory {
    fn default() -> Self {
        Self
    }
}

#[async_trait]
impl ServicesFactory for PluginServicesFactory {
    async fn build_services(&self, cfg: &AppConfig) -> Result<Services, GovernorError> {
        let facade = factory::build_facade(cfg)?;
        let memory = factory::build_memory_governor(cfg);
        let store = factory::build_store(cfg)?;
        let cache = factory::build_cache(cfg);

        memory.register_reclaim_hook(Arc::new(CacheReclaimHook::new(cache.clone())));
        memory.register_reclaim_hook(Arc::new(StoreCleanupHook::new(store.clone())));

        let runner = factory::build_runner(cfg, memory.clone());
        let breaker = factory::build_breaker(cfg, DEFAULT_BREAKER);
        tracing::debug!(
            channels = facade.registry().len(),
            strategy = facade.strategy_name(),
            store = store.backend_name(),
            "services built"
        );
        Ok(Services {
            facade,
            memory,
            runner,
            store,
            cache,
            breaker,
        })
    }
}
