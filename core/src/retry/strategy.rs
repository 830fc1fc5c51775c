use std::sync::Arc;
use std::time::Duration;

/// Decides how long to wait between attempts of a retried operation.
pub trait BackoffStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Raw wait after attempt `attempt` (0-based) failed, ignoring the
    /// attempt budget.
    fn backoff(&self, attempt: u32, error: &str) -> Duration;

    /// Delay before attempt `attempt + 1`, given that attempt `attempt`
    /// just failed. `None` once the budget is spent.
    fn next_delay(&self, attempt: u32, error: &str) -> Option<Duration> {
        if attempt.saturating_add(1) >= self.max_attempts() {
            return None;
        }
        Some(self.backoff(attempt, error))
    }

    fn max_attempts(&self) -> u32;

    fn should_retry(&self, attempt: u32, error: &str) -> bool {
        attempt + 1 < self.max_attempts() && !self.is_fatal_error(error)
    }

    fn is_fatal_error(&self, _error: &str) -> bool {
        false
    }
}

impl<S: BackoffStrategy + ?Sized> BackoffStrategy for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn backoff(&self, attempt: u32, error: &str) -> Duration {
        (**self).backoff(attempt, error)
    }

    fn next_delay(&self, attempt: u32, error: &str) -> Option<Duration> {
        (**self).next_delay(attempt, error)
    }

    fn max_attempts(&self) -> u32 {
        (**self).max_attempts()
    }

    fn is_fatal_error(&self, error: &str) -> bool {
        (**self).is_fatal_error(error)
    }
}

/// Overrides the attempt budget of another strategy, keeping its delays.
pub struct AttemptCap<'a> {
    inner: &'a dyn BackoffStrategy,
    max_attempts: u32,
}

impl<'a> AttemptCap<'a> {
    pub fn new(inner: &'a dyn BackoffStrategy, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl BackoffStrategy for AttemptCap<'_> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn backoff(&self, attempt: u32, error: &str) -> Duration {
        self.inner.backoff(attempt, error)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn is_fatal_error(&self, error: &str) -> bool {
        self.inner.is_fatal_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl BackoffStrategy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn backoff(&self, attempt: u32, _error: &str) -> Duration {
            Duration::from_millis(10 * (attempt as u64 + 1))
        }

        fn max_attempts(&self) -> u32 {
            2
        }
    }

    #[test]
    fn cap_extends_past_inner_budget() {
        assert_eq!(Fixed.next_delay(1, "err"), None);

        let capped = AttemptCap::new(&Fixed, 5);
        assert_eq!(capped.max_attempts(), 5);
        assert_eq!(capped.next_delay(1, "err"), Some(Duration::from_millis(20)));
        assert_eq!(capped.next_delay(3, "err"), Some(Duration::from_millis(40)));
        assert_eq!(capped.next_delay(4, "err"), None);
    }

    #[test]
    fn cap_of_zero_still_runs_once() {
        let capped = AttemptCap::new(&Fixed, 0);
        assert_eq!(capped.max_attempts(), 1);
        assert!(!capped.should_retry(0, "err"));
    }
}
