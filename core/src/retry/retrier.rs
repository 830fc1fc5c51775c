use std::fmt::Display;
use std::future::Future;

use crate::error::GovernorError;

use super::policy::{RetryObserver, RetryPolicy};
use super::strategy::BackoffStrategy;

/// Run `op` under `policy`, sleeping with exponential backoff between
/// failed attempts.
///
/// Only the final outcome is visible to the caller: a success value or one
/// [`GovernorError::RetriesExhausted`] carrying every attempt's message.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, op: F) -> Result<T, GovernorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_with(policy, policy.on_retry.as_ref(), op).await
}

/// Same loop as [`retry`], driven by any [`BackoffStrategy`].
pub async fn retry_with<S, F, Fut, T, E>(
    strategy: &S,
    on_retry: Option<&RetryObserver>,
    mut op: F,
) -> Result<T, GovernorError>
where
    S: BackoffStrategy + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = strategy.max_attempts().max(1);
    let mut history: Vec<String> = Vec::new();

    for attempt in 0..max_attempts {
        let err = match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        strategy = strategy.name(),
                        attempt = attempt + 1,
                        "operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err.to_string(),
        };
        history.push(err.clone());

        if !strategy.should_retry(attempt, &err) {
            if strategy.is_fatal_error(&err) {
                tracing::debug!(strategy = strategy.name(), error = %err, "fatal error, not retrying");
            }
            break;
        }
        let Some(delay) = strategy.next_delay(attempt, &err) else {
            break;
        };

        if let Some(observer) = on_retry {
            observer(&err, attempt + 1);
        }
        tracing::warn!(
            strategy = strategy.name(),
            attempt = attempt + 1,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }

    let attempts = history.len() as u32;
    let last_error = history.last().cloned().unwrap_or_default();
    Err(GovernorError::RetriesExhausted {
        attempts,
        last_error,
        history,
    })
}
