use std::time::Duration;

use tokio::time::Instant;

/// Roughly thirty years; well past any process lifetime.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `at + delay`, clamped so oversized configured durations cannot overflow.
pub(crate) fn saturating_after(at: Instant, delay: Duration) -> Instant {
    at.checked_add(delay)
        .or_else(|| at.checked_add(FAR_FUTURE))
        .unwrap_or(at)
}
