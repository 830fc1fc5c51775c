mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tollgate_core::api::{
    BoundedWorkRunner, ManualProbe, MemoryHealth, PayloadCache, ReclaimHook, RunnerOptions,
};

/// Drops the payload cache and reports what the probe gives back.
struct PurgeCache {
    cache: Arc<PayloadCache>,
    probe: Arc<ManualProbe>,
    runs: AtomicUsize,
}

#[async_trait]
impl ReclaimHook for PurgeCache {
    fn name(&self) -> &str {
        "purge-cache"
    }

    async fn reclaim(&self) -> u64 {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let dropped = self.cache.clear() as u64;
        self.probe.record_release(dropped * 100 * 1024 * 1024);
        dropped
    }
}

#[tokio::test(start_paused = true)]
async fn batch_processing_reclaims_between_chunks() {
    common::init_tracing();
    let (memory, probe) = common::governor(1000, 100);
    let cache = Arc::new(PayloadCache::new(16, Duration::from_secs(300)));
    let hook = Arc::new(PurgeCache {
        cache: cache.clone(),
        probe: probe.clone(),
        runs: AtomicUsize::new(0),
    });
    memory.register_reclaim_hook(hook.clone());

    let runner = BoundedWorkRunner::new(
        memory,
        RunnerOptions {
            batch_size: 3,
            batch_delay: Duration::from_millis(10),
            ..RunnerOptions::default()
        },
    );

    let out = runner
        .batch((1..=10).collect(), |n: u64| {
            let cache = cache.clone();
            let probe = probe.clone();
            async move {
                probe.record_allocation(100 * 1024 * 1024);
                cache.insert(format!("item:{n}"), serde_json::json!(n));
                Ok::<_, String>(n * 2)
            }
        })
        .await
        .unwrap();

    assert_eq!(out, vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20]);
    // Three gaps between four chunks.
    assert_eq!(hook.runs.load(Ordering::SeqCst), 3);
    assert_eq!(runner.memory().stats().reclaim_runs, 3);
}

#[tokio::test(start_paused = true)]
async fn stream_waits_for_in_flight_work_under_pressure() {
    let (memory, probe) = common::governor(1000, 0);
    let runner = BoundedWorkRunner::new(
        memory,
        RunnerOptions {
            stream_concurrency: 4,
            stream_pressure_pause: Duration::from_millis(100),
            ..RunnerOptions::default()
        },
    );

    let peak = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let outcome = runner
        .stream((0..6).collect(), |i: usize| {
            let probe = probe.clone();
            let peak = peak.clone();
            let active = active.clone();
            async move {
                // Each item holds 300MB while it runs: two in flight already
                // put usage over the warning fraction.
                probe.record_allocation(300 * 1024 * 1024);
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                probe.record_release(300 * 1024 * 1024);
                Ok::<_, String>(i)
            }
        })
        .await
        .unwrap();

    assert_eq!(outcome.len(), 6);
    assert_eq!(outcome.forced_admissions, 0);
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(outcome.into_input_order(), vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn health_events_follow_usage() {
    let (memory, probe) = common::governor(1000, 100);
    let mut events = memory.subscribe();
    memory.start_monitoring(Duration::from_millis(500));

    probe.set_used_mb(850);
    let event = events.recv().await.unwrap();
    assert_eq!(event.current, MemoryHealth::Warning);
    assert_eq!(event.sample.used_mb, 850);

    probe.set_used_mb(100);
    let event = events.recv().await.unwrap();
    assert_eq!(event.previous, MemoryHealth::Warning);
    assert_eq!(event.current, MemoryHealth::Ok);
    memory.stop_monitoring();
}
