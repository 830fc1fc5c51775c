use std::sync::Arc;

use crate::breaker::CircuitBreaker;
use crate::cache::TtlCache;
use crate::config::AppConfig;
use crate::error::GovernorError;
use crate::facade::RateLimitedFacade;
use crate::memory::MemoryGovernor;
use crate::runner::BoundedWorkRunner;
use crate::store::QuotaKeyedStore;

/// Cache of JSON payloads shared by call sites that fetch through the facade.
pub type PayloadCache = TtlCache<serde_json::Value>;

/// Every governor service, built once by the composition root.
#[derive(Clone)]
pub struct Services {
    pub facade: RateLimitedFacade,
    pub memory: MemoryGovernor,
    pub runner: BoundedWorkRunner,
    pub store: QuotaKeyedStore,
    pub cache: Arc<PayloadCache>,
    pub breaker: CircuitBreaker,
}

#[async_trait::async_trait]
pub trait ServicesFactory: Send + Sync {
    async fn build_services(&self, cfg: &AppConfig) -> Result<Services, GovernorError>;
}

#[derive(Clone)]
pub struct AppContext {
    cfg: AppConfig,
    services_factory: Option<Arc<dyn ServicesFactory>>,
}

impl AppContext {
    pub fn new(cfg: AppConfig, services_factory: Option<Arc<dyn ServicesFactory>>) -> Self {
        Self {
            cfg,
            services_factory,
        }
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn with_config(&self, cfg: AppConfig) -> Self {
        Self {
            cfg,
            services_factory: self.services_factory.clone(),
        }
    }

    pub async fn build_services(&self) -> Result<Services, GovernorError> {
        let Some(factory) = self.services_factory.as_ref() else {
            return Err(GovernorError::Config(
                "services_factory missing (cannot build services)".into(),
            ));
        };
        self.cfg.validate()?;
        factory.build_services(&self.cfg).await
    }
}
