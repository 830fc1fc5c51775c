use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::clock::saturating_after;
use crate::config::MemoryConfig;

use super::hooks::ReclaimHook;
use super::probe::MemoryProbe;
use super::thresholds::{MemoryHealth, MemoryThresholds};

const MIB: f64 = 1024.0 * 1024.0;

fn to_mb(bytes: u64) -> u64 {
    (bytes as f64 / MIB).round() as u64
}

/// One reading, scaled against the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemorySample {
    pub used_mb: u64,
    pub total_mb: u64,
    /// `used_mb / max_memory_mb * 100`, two decimals.
    pub percent_used: f64,
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub rss_bytes: u64,
    pub virtual_bytes: u64,
}

impl MemorySample {
    pub fn ratio(&self) -> f64 {
        self.percent_used / 100.0
    }
}

/// Broadcast whenever monitoring observes a change of health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryEvent {
    pub previous: MemoryHealth,
    pub current: MemoryHealth,
    pub sample: MemorySample,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub probe: String,
    pub sample: MemorySample,
    pub max_memory_mb: u64,
    pub health: MemoryHealth,
    pub reclaim_hooks: usize,
    pub reclaim_runs: u64,
    pub monitoring: bool,
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Memory statistics ({} probe)", self.probe)?;
        writeln!(f, "  Used:       {}MB / {}MB", self.sample.used_mb, self.max_memory_mb)?;
        writeln!(f, "  Percentage: {:.2}%", self.sample.percent_used)?;
        writeln!(f, "  RSS:        {}MB", to_mb(self.sample.rss_bytes))?;
        writeln!(f, "  Virtual:    {}MB", to_mb(self.sample.virtual_bytes))?;
        writeln!(
            f,
            "  Reclaim:    {} hooks, {} runs",
            self.reclaim_hooks, self.reclaim_runs
        )?;
        write!(f, "  Status:     {}", self.health)
    }
}

struct Inner {
    probe: Arc<dyn MemoryProbe>,
    max_memory_mb: u64,
    thresholds: MemoryThresholds,
    reclaim_pause: Duration,
    hooks: RwLock<Vec<Arc<dyn ReclaimHook>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    last_health: Mutex<MemoryHealth>,
    events: broadcast::Sender<MemoryEvent>,
    reclaim_runs: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let handle = self
            .monitor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Samples process memory, classifies it and offers admission control.
#[derive(Clone)]
pub struct MemoryGovernor {
    inner: Arc<Inner>,
}

impl fmt::Debug for MemoryGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryGovernor")
            .field("probe", &self.inner.probe.name())
            .field("max_memory_mb", &self.inner.max_memory_mb)
            .field("thresholds", &self.inner.thresholds)
            .finish()
    }
}

impl MemoryGovernor {
    pub fn new(probe: Arc<dyn MemoryProbe>, cfg: &MemoryConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                probe,
                max_memory_mb: cfg.max_memory_mb.max(1),
                thresholds: MemoryThresholds::from(cfg),
                reclaim_pause: Duration::from_millis(cfg.reclaim_pause_ms),
                hooks: RwLock::new(Vec::new()),
                monitor: Mutex::new(None),
                last_health: Mutex::new(MemoryHealth::Ok),
                events,
                reclaim_runs: AtomicU64::new(0),
            }),
        }
    }

    pub fn max_memory_mb(&self) -> u64 {
        self.inner.max_memory_mb
    }

    pub fn thresholds(&self) -> MemoryThresholds {
        self.inner.thresholds
    }

    pub fn sample(&self) -> MemorySample {
        let reading = self.inner.probe.read();
        let used_mb = to_mb(reading.used_bytes);
        let percent = used_mb as f64 / self.inner.max_memory_mb as f64 * 100.0;
        MemorySample {
            used_mb,
            total_mb: to_mb(reading.total_bytes),
            percent_used: (percent * 100.0).round() / 100.0,
            used_bytes: reading.used_bytes,
            total_bytes: reading.total_bytes,
            rss_bytes: reading.rss_bytes,
            virtual_bytes: reading.virtual_bytes,
        }
    }

    pub fn health(&self) -> MemoryHealth {
        self.inner.thresholds.level_for_ratio(self.sample().ratio())
    }

    /// Strictly above the warning fraction; the streaming runner's pause signal.
    pub fn over_warning(&self) -> bool {
        self.sample().ratio() > self.inner.thresholds.warning
    }

    /// Would `estimated_mb` more keep projected usage below the critical fraction?
    pub fn can_admit(&self, estimated_mb: f64) -> bool {
        let used = self.sample().used_mb as f64;
        let projected = (used + estimated_mb.max(0.0)) / self.inner.max_memory_mb as f64;
        let admit = projected < self.inner.thresholds.critical;
        if !admit {
            tracing::debug!(
                used_mb = used,
                estimated_mb,
                projected = projected,
                "admission refused"
            );
        }
        admit
    }

    pub fn register_reclaim_hook(&self, hook: Arc<dyn ReclaimHook>) {
        tracing::debug!(hook = hook.name(), "reclaim hook registered");
        self.inner
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    pub fn reclaim_hook_count(&self) -> usize {
        self.inner
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run every reclaim hook, then give freed memory a moment to settle.
    ///
    /// Without hooks this is a no-op and returns immediately.
    pub async fn reclaim(&self) -> u64 {
        let hooks: Vec<Arc<dyn ReclaimHook>> = self
            .inner
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if hooks.is_empty() {
            tracing::debug!("reclaim requested but no hooks are registered");
            return 0;
        }

        self.inner.reclaim_runs.fetch_add(1, Ordering::Relaxed);
        let mut freed = 0u64;
        for hook in &hooks {
            let bytes = hook.reclaim().await;
            tracing::debug!(hook = hook.name(), freed_bytes = bytes, "reclaim hook ran");
            freed = freed.saturating_add(bytes);
        }
        tokio::time::sleep(self.inner.reclaim_pause).await;

        let after = self.sample();
        tracing::info!(
            used_mb = after.used_mb,
            max_mb = self.inner.max_memory_mb,
            percent = after.percent_used,
            freed_bytes = freed,
            "memory after reclaim"
        );
        freed
    }

    /// Sample once, log threshold crossings and reclaim when critical.
    pub async fn check(&self) -> MemoryHealth {
        let sample = self.sample();
        let current = self.inner.thresholds.level_for_ratio(sample.ratio());
        let previous = {
            let mut last = self
                .inner
                .last_health
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *last, current)
        };

        match current {
            MemoryHealth::Critical => tracing::error!(
                percent = sample.percent_used,
                used_mb = sample.used_mb,
                "memory usage critical"
            ),
            MemoryHealth::Warning => tracing::warn!(
                percent = sample.percent_used,
                used_mb = sample.used_mb,
                "memory usage high"
            ),
            MemoryHealth::Ok => {}
        }
        if previous != current {
            // No subscribers is fine.
            let _ = self.inner.events.send(MemoryEvent {
                previous,
                current,
                sample,
            });
        }
        if current == MemoryHealth::Critical {
            self.reclaim().await;
        }
        current
    }

    /// Check every `interval` on a background task. Restarting replaces the
    /// previous task. The task ends once every governor handle is dropped.
    pub fn start_monitoring(&self, interval: Duration) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(saturating_after(tokio::time::Instant::now(), period), period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                MemoryGovernor { inner }.check().await;
            }
        });

        let previous = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        tracing::info!(interval_ms = period.as_millis() as u64, "memory monitoring started");
    }

    pub fn stop_monitoring(&self) {
        let handle = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("memory monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MemoryEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> MemoryStats {
        let sample = self.sample();
        MemoryStats {
            probe: self.inner.probe.name().to_string(),
            sample,
            max_memory_mb: self.inner.max_memory_mb,
            health: self.inner.thresholds.level_for_ratio(sample.ratio()),
            reclaim_hooks: self.reclaim_hook_count(),
            reclaim_runs: self.inner.reclaim_runs.load(Ordering::Relaxed),
            monitoring: self.is_monitoring(),
        }
    }
}
