use std::time::Duration;

use rand::Rng;
use tollgate_core::api::{BackoffStrategy, RetryConfig};

/// Exponential backoff with "equal jitter": each delay is drawn uniformly
/// from the upper half of the exponential step, so callers that failed
/// together spread out without ever retrying immediately.
pub struct JitteredBackoffPlugin {
    config: RetryConfig,
}

pub struct LinearRetryPlugin {
    config: RetryConfig,
}

impl JitteredBackoffPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Un-jittered delay for `attempt`, capped at `max_delay_ms`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = self.config.backoff_multiplier.powi(attempt.min(63) as i32);
        let ms = (self.config.base_delay_ms as f64 * exp).min(self.config.max_delay_ms as f64);
        Duration::from_millis(ms.max(0.0).round() as u64)
    }
}

impl LinearRetryPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl BackoffStrategy for JitteredBackoffPlugin {
    fn name(&self) -> &str {
        "exponential-jitter"
    }

    fn backoff(&self, attempt: u32, _error: &str) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        let floor = ceiling / 2;
        Duration::from_millis(rand::thread_rng().gen_range(floor..=ceiling))
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }
}

impl BackoffStrategy for LinearRetryPlugin {
    fn name(&self) -> &str {
        "linear"
    }

    fn backoff(&self, attempt: u32, _error: &str) -> Duration {
        let multiplier = attempt.saturating_add(1) as u64;
        let delay = self.config.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay.min(self.config.max_delay_ms))
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(strategy: &str, base: u64, max: u64, attempts: u32) -> RetryConfig {
        RetryConfig {
            strategy: strategy.to_string(),
            base_delay_ms: base,
            max_delay_ms: max,
            backoff_multiplier: 2.0,
            max_attempts: attempts,
        }
    }

    #[test]
    fn test_jittered_backoff_stays_in_upper_half() {
        let plugin = JitteredBackoffPlugin::new(cfg("exponential-jitter", 100, 1000, 6));
        for _ in 0..50 {
            let d = plugin.next_delay(0, "err").unwrap().as_millis();
            assert!((50..=100).contains(&d), "attempt 0 delay {d}");
            let d = plugin.next_delay(2, "err").unwrap().as_millis();
            assert!((200..=400).contains(&d), "attempt 2 delay {d}");
            let d = plugin.next_delay(4, "err").unwrap().as_millis();
            assert!((500..=1000).contains(&d), "attempt 4 delay {d}");
        }
        assert_eq!(plugin.next_delay(5, "err"), None);
        assert_eq!(plugin.ceiling(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_linear_backoff() {
        let plugin = LinearRetryPlugin::new(cfg("linear", 50, 200, 6));
        assert_eq!(plugin.next_delay(0, "err").unwrap().as_millis(), 50);
        assert_eq!(plugin.next_delay(2, "err").unwrap().as_millis(), 150);
        assert_eq!(plugin.next_delay(4, "err").unwrap().as_millis(), 200);
        assert_eq!(plugin.next_delay(5, "err"), None);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let plugin = LinearRetryPlugin::new(cfg("linear", 50, 200, 1));
        assert!(!plugin.should_retry(0, "err"));
        assert_eq!(plugin.next_delay(0, "err"), None);
    }
}
