//! Coalesce concurrent calls that share a key into one underlying execution.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};

/// Cloneable handle to an in-flight (or settled) deduplicated result.
pub type DedupeHandle<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Entry<T, E> {
    id: u64,
    handle: DedupeHandle<T, E>,
}

struct Inner<T, E> {
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, Entry<T, E>>>,
}

impl<T, E> Inner<T, E> {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, Entry<T, E>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `key` only if it still belongs to execution `id`.
    fn settle(&self, key: &str, id: u64) {
        let mut pending = self.pending();
        if pending.get(key).is_some_and(|entry| entry.id == id) {
            pending.remove(key);
        }
    }
}

/// Callers sharing a key observe the same success value or the same failure.
///
/// Both `T` and `E` must be `Clone` because every waiter receives its own
/// copy of the outcome; wrap non-clonable errors in `Arc`.
pub struct Deduplicator<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for Deduplicator<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Default for Deduplicator<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Deduplicator<T, E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.pending().contains_key(key)
    }

    /// Forget one key (or every key). Callers already holding a handle still
    /// receive its result; the next call for the key starts a fresh execution.
    pub fn clear(&self, key: Option<&str>) {
        let mut pending = self.inner.pending();
        match key {
            Some(key) => {
                pending.remove(key);
            }
            None => pending.clear(),
        }
    }
}

impl<T, E> Deduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Join the in-flight execution for `key`, or start `op` and register it.
    ///
    /// The lookup and the insertion happen under one lock with no suspension
    /// point in between, so at most one entry exists per key at any instant.
    /// The entry is removed exactly once, when the execution settles.
    pub fn dedupe<F, Fut>(&self, key: &str, op: F) -> DedupeHandle<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut pending = self.inner.pending();
        if let Some(entry) = pending.get(key) {
            tracing::debug!(key, "deduplicating request");
            return entry.handle.clone();
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<Inner<T, E>> = Arc::downgrade(&self.inner);
        let owned_key = key.to_string();
        let fut = op();
        let handle = async move {
            let outcome = fut.await;
            if let Some(inner) = weak.upgrade() {
                inner.settle(&owned_key, id);
            }
            outcome
        }
        .boxed()
        .shared();

        pending.insert(
            key.to_string(),
            Entry {
                id,
                handle: handle.clone(),
            },
        );
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let dedup: Deduplicator<u32, String> = Deduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<u32>();

        let c = calls.clone();
        let first = dedup.dedupe("k", move || {
            c.fetch_add(1, Ordering::SeqCst);
            async move { rx.await.map_err(|e| e.to_string()) }
        });
        let c = calls.clone();
        let second = dedup.dedupe("k", move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(99) }
        });

        assert!(dedup.is_pending("k"));
        tx.send(7).unwrap();
        let (a, b) = tokio::join!(first, second);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a, Ok(7));
        assert_eq!(b, Ok(7));
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn failures_are_shared_and_entry_is_removed() {
        let dedup: Deduplicator<u32, String> = Deduplicator::new();
        let (tx, rx) = oneshot::channel::<()>();

        let first = dedup.dedupe("k", move || async move {
            let _ = rx.await;
            Err::<u32, _>("quota".to_string())
        });
        let second = dedup.dedupe("k", || async { Ok(1) });
        tx.send(()).unwrap();

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a, Err("quota".to_string()));
        assert_eq!(a, b);
        assert!(!dedup.is_pending("k"));

        // Settled: the next call runs a fresh execution.
        let third = dedup.dedupe("k", || async { Ok(3) }).await;
        assert_eq!(third, Ok(3));
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let dedup: Deduplicator<&'static str, String> = Deduplicator::new();
        let a = dedup.dedupe("a", || async { Ok("a") });
        let b = dedup.dedupe("b", || async { Ok("b") });
        assert_eq!(dedup.pending_count(), 2);
        assert_eq!(tokio::join!(a, b), (Ok("a"), Ok("b")));
    }

    #[tokio::test]
    async fn clear_keeps_existing_handles_and_protects_new_entry() {
        let dedup: Deduplicator<u32, String> = Deduplicator::new();
        let (tx_old, rx_old) = oneshot::channel::<()>();
        let (tx_new, rx_new) = oneshot::channel::<()>();

        let old = dedup.dedupe("k", move || async move {
            let _ = rx_old.await;
            Ok(1)
        });
        dedup.clear(Some("k"));
        let new = dedup.dedupe("k", move || async move {
            let _ = rx_new.await;
            Ok(2)
        });

        tx_old.send(()).unwrap();
        assert_eq!(old.await, Ok(1));
        // The old execution settling must not evict the newer entry.
        assert!(dedup.is_pending("k"));

        tx_new.send(()).unwrap();
        assert_eq!(new.await, Ok(2));
        assert!(!dedup.is_pending("k"));
    }
}
