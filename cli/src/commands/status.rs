use serde::Serialize;
use tollgate_core::api::{
    BreakerStatus, CacheStats, CliError, LimiterStats, MemoryStats, QuotaUsage, Services,
};

use super::emit;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub strategy: String,
    pub channels: Vec<LimiterStats>,
    pub memory: MemoryStats,
    pub storage: QuotaUsage,
    pub cache: CacheStats,
    pub breaker: BreakerStatus,
}

pub fn collect(services: &Services) -> Result<StatusReport, CliError> {
    Ok(StatusReport {
        strategy: services.facade.strategy_name().to_string(),
        channels: services.facade.stats(),
        memory: services.memory.stats(),
        storage: services.store.usage().map_err(tollgate_core::api::GovernorError::from)?,
        cache: services.cache.stats(),
        breaker: services.breaker.status(),
    })
}

pub fn render(report: &StatusReport) -> String {
    let mut out = format!("Channels (retry strategy: {})\n", report.strategy);
    for c in &report.channels {
        out.push_str(&format!(
            "  {:<16} running {}/{}  queued {:<3} min delay {}ms  completed {}  failed {}\n",
            c.channel, c.running, c.max_concurrent, c.queued, c.min_delay_ms, c.completed, c.failed
        ));
    }
    out.push_str(&format!("{}\n", report.memory));
    out.push_str(&format!("Storage: {}\n", report.storage));
    out.push_str(&format!(
        "Cache: {}/{} entries, {} hits, {} misses\n",
        report.cache.entries, report.cache.capacity, report.cache.hits, report.cache.misses
    ));
    out.push_str(&format!(
        "Breaker '{}': {:?}, {} consecutive failures",
        report.breaker.name, report.breaker.state, report.breaker.failures
    ));
    out
}

pub fn handle_status(services: &Services, json: bool) -> Result<(), CliError> {
    let report = collect(services)?;
    emit(json, &report, || render(&report))
}
