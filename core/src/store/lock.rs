use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::clock::saturating_after;
use crate::error::StoreError;

struct Lease {
    token: Uuid,
    /// `None` never expires.
    expires_at: Option<Instant>,
}

struct LockInner {
    leases: Mutex<HashMap<String, Lease>>,
    released: Notify,
    ttl: Option<Duration>,
    wait_timeout: Option<Duration>,
}

impl LockInner {
    fn leases(&self) -> MutexGuard<'_, HashMap<String, Lease>> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-key exclusive leases.
///
/// A lease past its TTL is force-released the next time someone needs the
/// key, so a holder that never finishes cannot wedge the key. The price is
/// that an operation slower than the TTL may overlap with the next holder.
#[derive(Clone)]
pub struct KeyLocks {
    inner: Arc<LockInner>,
}

impl KeyLocks {
    pub fn new(ttl: Option<Duration>, wait_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(LockInner {
                leases: Mutex::new(HashMap::new()),
                released: Notify::new(),
                ttl,
                wait_timeout,
            }),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.inner.ttl
    }

    pub fn is_locked(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .leases()
            .get(key)
            .is_some_and(|lease| lease.expires_at.map_or(true, |at| at > now))
    }

    /// Leases that are still live; expired ones awaiting force-release are
    /// not counted.
    pub fn held_count(&self) -> usize {
        let now = Instant::now();
        self.inner
            .leases()
            .values()
            .filter(|lease| lease.expires_at.map_or(true, |at| at > now))
            .count()
    }

    /// Wait until `key` is free (or its lease expires), then take it.
    pub async fn acquire(&self, key: &str) -> Result<KeyLockGuard, StoreError> {
        let started = Instant::now();
        let deadline = self.inner.wait_timeout.map(|t| saturating_after(started, t));

        loop {
            // Registered before inspecting the map so a release in between
            // still wakes us.
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let held_until = {
                let mut leases = self.inner.leases();
                let now = Instant::now();
                let expired = leases
                    .get(key)
                    .map(|lease| lease.expires_at.is_some_and(|at| at <= now));
                match expired {
                    None => return Ok(self.grant(&mut leases, key, now)),
                    Some(true) => {
                        tracing::warn!(key, "lock lease expired, force-releasing");
                        leases.remove(key);
                        return Ok(self.grant(&mut leases, key, now));
                    }
                    Some(false) => {
                        if deadline.is_some_and(|d| now >= d) {
                            return Err(StoreError::LockTimeout {
                                key: key.to_string(),
                                waited: now - started,
                            });
                        }
                        leases.get(key).and_then(|lease| lease.expires_at)
                    }
                }
            };

            let wake_at = match (held_until, deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    fn grant(&self, leases: &mut HashMap<String, Lease>, key: &str, now: Instant) -> KeyLockGuard {
        let token = Uuid::new_v4();
        leases.insert(
            key.to_string(),
            Lease {
                token,
                expires_at: self.inner.ttl.map(|ttl| saturating_after(now, ttl)),
            },
        );
        tracing::trace!(key, %token, "lock acquired");
        KeyLockGuard {
            inner: self.inner.clone(),
            key: key.to_string(),
            token,
        }
    }
}

/// Releases the lease on drop, unless it already expired and was handed on.
pub struct KeyLockGuard {
    inner: Arc<LockInner>,
    key: String,
    token: Uuid,
}

impl KeyLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// False once the lease has expired or been force-released.
    pub fn is_held(&self) -> bool {
        let now = Instant::now();
        self.inner.leases().get(&self.key).is_some_and(|lease| {
            lease.token == self.token && lease.expires_at.map_or(true, |at| at > now)
        })
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        let mut leases = self.inner.leases();
        if leases
            .get(&self.key)
            .is_some_and(|lease| lease.token == self.token)
        {
            leases.remove(&self.key);
        }
        drop(leases);
        self.inner.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn second_acquirer_waits_for_release() {
        let locks = KeyLocks::new(Some(Duration::from_secs(5)), None);
        let guard = locks.acquire("k").await.unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = tokio::spawn({
            let locks = locks.clone();
            let acquired = acquired.clone();
            async move {
                let _g = locks.acquire("k").await.unwrap();
                acquired.store(true, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!acquired.load(Ordering::SeqCst));

        drop(guard);
        waiter.await.unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(!locks.is_locked("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_force_released() {
        let locks = KeyLocks::new(Some(Duration::from_secs(5)), None);
        let stale = locks.acquire("k").await.unwrap();
        let start = Instant::now();

        let fresh = locks.acquire("k").await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert!(!stale.is_held());
        assert!(fresh.is_held());

        // The stale holder finishing must not release the new lease.
        drop(stale);
        assert!(locks.is_locked("k"));
        drop(fresh);
        assert!(!locks.is_locked("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_wait_times_out() {
        let locks = KeyLocks::new(None, Some(Duration::from_millis(200)));
        let _held = locks.acquire("k").await.unwrap();
        let err = locks.acquire("k").await.err().unwrap();
        match err {
            StoreError::LockTimeout { key, waited } => {
                assert_eq!(key, "k");
                assert_eq!(waited, Duration::from_millis(200));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let locks = KeyLocks::new(None, Some(Duration::from_millis(10)));
        let _a = locks.acquire("a").await.unwrap();
        let _b = locks.acquire("b").await.unwrap();
        assert_eq!(locks.held_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_leases_are_not_counted_as_held() {
        let locks = KeyLocks::new(Some(Duration::from_secs(5)), None);
        let _stale = locks.acquire("k").await.unwrap();
        assert_eq!(locks.held_count(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!locks.is_locked("k"));
        assert_eq!(locks.held_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_ttl_and_wait_do_not_overflow() {
        let locks = KeyLocks::new(
            Some(Duration::from_millis(u64::MAX)),
            Some(Duration::from_millis(u64::MAX)),
        );
        let guard = locks.acquire("k").await.unwrap();
        assert!(guard.is_held());
        assert!(locks.is_locked("k"));
    }
}
