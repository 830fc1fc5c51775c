pub mod api;
pub mod breaker;
pub mod cache;
mod clock;
pub mod config;
pub mod context;
pub mod dedupe;
pub mod error;
pub mod facade;
pub mod limiter;
pub mod memory;
pub mod retry;
pub mod runner;
pub mod store;

pub use error::{CliError, GovernorError, StoreError};
