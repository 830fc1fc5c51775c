use async_trait::async_trait;

/// Something that can give memory back when the governor asks.
///
/// Rust has no collector to nudge, so reclamation means dropping caches or
/// compacting state owned by the application.
#[async_trait]
pub trait ReclaimHook: Send + Sync {
    fn name(&self) -> &str;

    /// Release what can be released; returns an estimate of bytes freed.
    async fn reclaim(&self) -> u64;
}
