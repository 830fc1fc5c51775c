//! The entry point application code calls: limiter admission inside a retry loop.

use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::GovernorError;
use crate::limiter::{ChannelLimiter, ChannelRegistry, LimiterStats};
use crate::retry::{retry_with, AttemptCap, BackoffStrategy, RetryObserver, RetryPolicy};

/// Composes a [`ChannelRegistry`] with a [`BackoffStrategy`].
///
/// Every retry attempt is a fresh admission into the channel's limiter, so a
/// retried call queues behind work submitted while it was backing off.
#[derive(Clone)]
pub struct RateLimitedFacade {
    registry: ChannelRegistry,
    strategy: Arc<dyn BackoffStrategy>,
    on_retry: Option<RetryObserver>,
}

impl fmt::Debug for RateLimitedFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedFacade")
            .field("channels", &self.registry.names().collect::<Vec<_>>())
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

impl RateLimitedFacade {
    pub fn new(registry: ChannelRegistry, strategy: Arc<dyn BackoffStrategy>) -> Self {
        Self {
            registry,
            strategy,
            on_retry: None,
        }
    }

    /// Deterministic exponential backoff from `policy`, including its observer.
    pub fn with_policy(registry: ChannelRegistry, policy: RetryPolicy) -> Self {
        let on_retry = policy.on_retry.clone();
        Self {
            registry,
            strategy: Arc::new(policy),
            on_retry,
        }
    }

    pub fn with_observer(mut self, observer: RetryObserver) -> Self {
        self.on_retry = Some(observer);
        self
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn limiter(&self, channel: &str) -> Result<&ChannelLimiter, GovernorError> {
        self.registry.get(channel)
    }

    /// Run `op` on `channel` with at most `retries` attempts.
    ///
    /// An unknown channel fails immediately without invoking `op`.
    #[tracing::instrument(level = "debug", skip(self, op), fields(strategy = self.strategy.name()))]
    pub async fn call<F, Fut, T, E>(
        &self,
        channel: &str,
        retries: u32,
        mut op: F,
    ) -> Result<T, GovernorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let limiter = self.registry.get(channel)?;
        let strategy = AttemptCap::new(self.strategy.as_ref(), retries);
        retry_with(&strategy, self.on_retry.as_ref(), || limiter.execute(op())).await
    }

    /// [`call`](Self::call) with the strategy's own attempt budget.
    pub async fn call_default<F, Fut, T, E>(&self, channel: &str, op: F) -> Result<T, GovernorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.call(channel, self.strategy.max_attempts(), op).await
    }

    /// Bound the whole call (queueing, attempts and backoff) by `deadline`.
    ///
    /// On expiry the in-flight attempt is dropped, which releases its limiter
    /// slot or queue position.
    pub async fn call_with_deadline<F, Fut, T, E>(
        &self,
        channel: &str,
        retries: u32,
        deadline: Duration,
        op: F,
    ) -> Result<T, GovernorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        match tokio::time::timeout(deadline, self.call(channel, retries, op)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(channel, deadline_ms = deadline.as_millis() as u64, "call deadline exceeded");
                Err(GovernorError::DeadlineExceeded(deadline))
            }
        }
    }

    pub fn stats(&self) -> Vec<LimiterStats> {
        self.registry.stats()
    }
}
