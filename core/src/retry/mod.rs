//! Retry with exponential backoff around any fallible async operation.

mod policy;
mod retrier;
mod strategy;

pub use policy::{RetryObserver, RetryPolicy};
pub use retrier::{retry, retry_with};
pub use strategy::{AttemptCap, BackoffStrategy};
