use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tollgate_core::api::{AppConfig, AppContext, GovernorError};
use tollgate_plugins::factory::IN_MEMORY_STORE;
use tollgate_plugins::services::PluginServicesFactory;

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.storage.path = IN_MEMORY_STORE.into();
    cfg.retry.strategy = "linear".into();
    cfg.retry.base_delay_ms = 1;
    cfg.retry.max_delay_ms = 5;
    cfg
}

#[tokio::test(start_paused = true)]
async fn context_builds_wired_services() {
    let ctx = AppContext::new(config(), Some(Arc::new(PluginServicesFactory)));
    let services = ctx.build_services().await.unwrap();

    assert_eq!(services.facade.strategy_name(), "linear");
    assert_eq!(services.memory.reclaim_hook_count(), 2);
    assert_eq!(services.store.backend_name(), "memory");
    assert_eq!(services.runner.options().batch_size, 3);

    let calls = AtomicU32::new(0);
    let out = services
        .facade
        .call("pexels", 3, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("flaky")
            } else {
                Ok("photo")
            }
        })
        .await
        .unwrap();
    assert_eq!(out, "photo");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(services.store.set("temp_draft", "x").await.unwrap());
    services.cache.insert("q", serde_json::json!({"hits": 1}));
    services.memory.reclaim().await;
    assert!(services.cache.is_empty());
    assert_eq!(services.store.get("temp_draft").await.unwrap(), None);
}

#[tokio::test]
async fn invalid_config_fails_before_building() {
    let mut cfg = config();
    cfg.retry.strategy = "wobbly".into();
    let ctx = AppContext::new(cfg, Some(Arc::new(PluginServicesFactory)));
    assert!(matches!(ctx.build_services().await, Err(GovernorError::Config(_))));

    let mut cfg = config();
    cfg.memory.critical = 0.5;
    let ctx = AppContext::new(cfg, Some(Arc::new(PluginServicesFactory)));
    assert!(matches!(ctx.build_services().await, Err(GovernorError::Config(_))));
}
