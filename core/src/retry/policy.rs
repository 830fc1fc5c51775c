use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;

use super::strategy::BackoffStrategy;

/// Called before each backoff sleep with the failed attempt's error message
/// and the 1-based number of the attempt that failed.
pub type RetryObserver = Arc<dyn Fn(&str, u32) + Send + Sync>;

/// Deterministic exponential backoff: `min(initial * multiplier^i, max)`.
///
/// No jitter is applied, so identical failures always wait the same amount.
/// Use a jittered strategy from the plugins crate when many callers may fail
/// together.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub on_retry: Option<RetryObserver>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_attempts.max(1),
            initial_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_multiplier: cfg.backoff_multiplier,
            on_retry: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(&str, u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt.min(63) as i32);
        let max_us = self.max_delay.as_micros() as f64;
        // f64::min drops a NaN operand, so overflow lands on the ceiling.
        let us = (self.initial_delay.as_micros() as f64 * exp).min(max_us);
        Duration::from_micros(us.max(0.0).round() as u64)
    }
}

impl BackoffStrategy for RetryPolicy {
    fn name(&self) -> &str {
        "exponential"
    }

    fn backoff(&self, attempt: u32, _error: &str) -> Duration {
        self.delay_for(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delays_are_capped() {
        let policy = RetryPolicy::default()
            .with_max_retries(6)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1000));
        assert_eq!(policy.next_delay(0, "err"), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(1, "err"), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3, "err"), Some(Duration::from_millis(800)));
        assert_eq!(policy.next_delay(4, "err"), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(5, "err"), None);
    }

    #[test]
    fn single_attempt_never_waits() {
        let policy = RetryPolicy::default().with_max_retries(1);
        assert_eq!(policy.next_delay(0, "err"), None);
        assert!(!policy.should_retry(0, "err"));
    }

    #[test]
    fn from_config_maps_fields() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            strategy: "exponential".into(),
            base_delay_ms: 50,
            max_delay_ms: 400,
            backoff_multiplier: 3.0,
            max_attempts: 4,
        });
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_for(1), Duration::from_millis(150));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }
}
