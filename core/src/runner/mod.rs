//! Run a processor over a collection under both a concurrency bound and the
//! memory governor's admission signal.
//!
//! Both modes fail fast: the first item error cancels the items still in
//! flight and is returned as an [`ItemFailure`] naming the input index.

mod batch;
mod stream;

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::config::RunnerConfig;
use crate::memory::MemoryGovernor;

pub use stream::{Completed, StreamOutcome};

/// The first failing item of a batch or stream run.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure<E> {
    /// Position of the failing item in the input.
    pub index: usize,
    pub error: E,
    /// Items that had finished successfully before the failure was observed.
    pub completed: usize,
}

impl<E: fmt::Display> fmt::Display for ItemFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "item {} failed after {} completed: {}",
            self.index, self.completed, self.error
        )
    }
}

impl<E: fmt::Debug + fmt::Display> StdError for ItemFailure<E> {}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub estimated_batch_mb: f64,
    pub batch_pressure_pause: Duration,
    pub stream_concurrency: usize,
    pub stream_pressure_pause: Duration,
    pub stream_max_pressure_pauses: u32,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from(&RunnerConfig::default())
    }
}

impl From<&RunnerConfig> for RunnerOptions {
    fn from(cfg: &RunnerConfig) -> Self {
        Self {
            batch_size: cfg.batch_size.max(1),
            batch_delay: Duration::from_millis(cfg.batch_delay_ms),
            estimated_batch_mb: cfg.estimated_batch_mb,
            batch_pressure_pause: Duration::from_millis(cfg.batch_pressure_pause_ms),
            stream_concurrency: cfg.stream_concurrency.max(1),
            stream_pressure_pause: Duration::from_millis(cfg.stream_pressure_pause_ms),
            stream_max_pressure_pauses: cfg.stream_max_pressure_pauses,
        }
    }
}

/// Batch and streaming processors sharing one [`MemoryGovernor`].
#[derive(Debug, Clone)]
pub struct BoundedWorkRunner {
    memory: MemoryGovernor,
    options: RunnerOptions,
}

impl BoundedWorkRunner {
    pub fn new(memory: MemoryGovernor, options: RunnerOptions) -> Self {
        Self { memory, options }
    }

    pub fn from_config(memory: MemoryGovernor, cfg: &RunnerConfig) -> Self {
        Self::new(memory, RunnerOptions::from(cfg))
    }

    pub fn memory(&self) -> &MemoryGovernor {
        &self.memory
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }
}
