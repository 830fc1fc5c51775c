//! Advisory memory admission control.
//!
//! Nothing here stops work that is already running; producers are expected
//! to ask [`MemoryGovernor::can_admit`] before starting more.

mod governor;
mod hooks;
mod probe;
mod thresholds;

pub use governor::{MemoryEvent, MemoryGovernor, MemorySample, MemoryStats};
pub use hooks::ReclaimHook;
pub use probe::{ManualProbe, MemoryProbe, MemoryReading, SysinfoProbe};
pub use thresholds::{MemoryHealth, MemoryThresholds};
