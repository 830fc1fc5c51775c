//! Per-channel concurrency bounds and start pacing.

#[allow(clippy::module_inception)]
mod limiter;
mod registry;

pub use limiter::{ChannelLimiter, LimiterStats};
pub use registry::ChannelRegistry;
