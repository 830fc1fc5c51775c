use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use sysinfo::{Pid, System};

/// Raw figures in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReading {
    /// Memory attributed to this process; what admission is measured against.
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub rss_bytes: u64,
    pub virtual_bytes: u64,
}

/// Source of memory figures for the governor.
pub trait MemoryProbe: Send + Sync {
    fn name(&self) -> &str;
    fn read(&self) -> MemoryReading;
}

/// Reads this process's resident and virtual size through `sysinfo`.
pub struct SysinfoProbe {
    sys: Mutex<System>,
    pid: Option<Pid>,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = e, "cannot resolve current pid; process memory reads as 0");
                None
            }
        };
        // One System reused across reads; creating it re-detects hardware.
        Self {
            sys: Mutex::new(System::new()),
            pid,
        }
    }
}

impl MemoryProbe for SysinfoProbe {
    fn name(&self) -> &str {
        "sysinfo"
    }

    fn read(&self) -> MemoryReading {
        let mut sys = self.sys.lock().unwrap_or_else(PoisonError::into_inner);
        sys.refresh_memory();
        let total_bytes = sys.total_memory();

        let (rss_bytes, virtual_bytes) = match self.pid {
            Some(pid) if sys.refresh_process(pid) => sys
                .process(pid)
                .map(|p| (p.memory(), p.virtual_memory()))
                .unwrap_or_default(),
            _ => (0, 0),
        };

        MemoryReading {
            used_bytes: rss_bytes,
            total_bytes,
            rss_bytes,
            virtual_bytes,
        }
    }
}

/// Probe fed by the application's own accounting (or by tests).
#[derive(Debug, Default)]
pub struct ManualProbe {
    used: AtomicU64,
    total: AtomicU64,
}

impl ManualProbe {
    pub fn new(used_bytes: u64, total_bytes: u64) -> Self {
        Self {
            used: AtomicU64::new(used_bytes),
            total: AtomicU64::new(total_bytes),
        }
    }

    pub fn with_used_mb(used_mb: u64) -> Self {
        Self::new(used_mb * 1024 * 1024, 0)
    }

    pub fn set_used(&self, bytes: u64) {
        self.used.store(bytes, Ordering::SeqCst);
    }

    pub fn set_used_mb(&self, mb: u64) {
        self.set_used(mb * 1024 * 1024);
    }

    pub fn record_allocation(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn record_release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                Some(cur.saturating_sub(bytes))
            });
    }
}

impl MemoryProbe for ManualProbe {
    fn name(&self) -> &str {
        "manual"
    }

    fn read(&self) -> MemoryReading {
        let used = self.used.load(Ordering::SeqCst);
        MemoryReading {
            used_bytes: used,
            total_bytes: self.total.load(Ordering::SeqCst),
            rss_bytes: used,
            virtual_bytes: 0,
        }
    }
}
