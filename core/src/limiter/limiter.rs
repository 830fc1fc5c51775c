use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::clock::saturating_after;
use crate::config::ChannelConfig;

/// Point-in-time view of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub channel: String,
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub min_delay_ms: u64,
    pub completed: u64,
    pub failed: u64,
}

struct Waiter {
    ticket: u64,
    /// Receives the instant the task may start invoking its work.
    start_tx: oneshot::Sender<Instant>,
}

struct LimiterState {
    running: usize,
    queue: VecDeque<Waiter>,
    last_execution: Option<Instant>,
    next_ticket: u64,
}

struct Inner {
    name: String,
    max_concurrent: usize,
    min_delay: Duration,
    state: Mutex<LimiterState>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand free slots to queued tasks in FIFO order.
    ///
    /// Each admitted task is given a start instant at least `min_delay` after
    /// the previous one, so pacing applies to invocation starts while the
    /// slot is counted as running from the moment it is handed out.
    fn dispatch(&self, state: &mut LimiterState) {
        while state.running < self.max_concurrent {
            let Some(waiter) = state.queue.pop_front() else {
                break;
            };
            let now = Instant::now();
            let start_at = match state.last_execution {
                Some(last) => saturating_after(last, self.min_delay).max(now),
                None => now,
            };
            if waiter.start_tx.send(start_at).is_ok() {
                state.running += 1;
                state.last_execution = Some(start_at);
                tracing::trace!(
                    channel = %self.name,
                    ticket = waiter.ticket,
                    running = state.running,
                    wait_ms = start_at.saturating_duration_since(now).as_millis() as u64,
                    "task admitted"
                );
            }
        }
    }

    fn release(&self) {
        let mut state = self.state();
        state.running = state.running.saturating_sub(1);
        let now = Instant::now();
        state.last_execution = Some(state.last_execution.map_or(now, |last| last.max(now)));
        self.dispatch(&mut state);
    }
}

/// Bounds concurrency and paces invocation starts for one named channel.
///
/// Tasks are admitted in submission order; completion order is whatever the
/// tasks' own durations make it. A failing task only affects its own caller.
#[derive(Clone)]
pub struct ChannelLimiter {
    inner: Arc<Inner>,
}

impl ChannelLimiter {
    pub fn new(name: impl Into<String>, config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                max_concurrent: config.max_concurrent.max(1),
                min_delay: config.min_delay(),
                state: Mutex::new(LimiterState {
                    running: 0,
                    queue: VecDeque::new(),
                    last_execution: None,
                    next_ticket: 0,
                }),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    pub fn min_delay(&self) -> Duration {
        self.inner.min_delay
    }

    pub fn stats(&self) -> LimiterStats {
        let state = self.inner.state();
        LimiterStats {
            channel: self.inner.name.clone(),
            running: state.running,
            queued: state.queue.len(),
            max_concurrent: self.inner.max_concurrent,
            min_delay_ms: self.inner.min_delay.as_millis() as u64,
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }

    /// Run `task` once a slot is free and the pacing delay has elapsed.
    ///
    /// Dropping the returned future cancels the task: a queued task gives up
    /// its position, an admitted one frees its slot.
    pub async fn execute<F, T, E>(&self, task: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let slot = self.admit().await;
        let outcome = task.await;
        slot.finish(outcome.is_ok());
        outcome
    }

    async fn admit(&self) -> Slot {
        loop {
            let mut queued = {
                let mut state = self.inner.state();
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                let (start_tx, start_rx) = oneshot::channel();
                state.queue.push_back(Waiter { ticket, start_tx });
                self.inner.dispatch(&mut state);
                QueuedTicket {
                    inner: self.inner.clone(),
                    ticket,
                    start_rx: Some(start_rx),
                }
            };

            let Some(start_at) = queued.granted().await else {
                continue;
            };
            let slot = Slot {
                inner: self.inner.clone(),
            };
            tokio::time::sleep_until(start_at).await;
            return slot;
        }
    }
}

/// A queue position; releases itself (or the slot it was granted) on drop.
struct QueuedTicket {
    inner: Arc<Inner>,
    ticket: u64,
    start_rx: Option<oneshot::Receiver<Instant>>,
}

impl QueuedTicket {
    async fn granted(&mut self) -> Option<Instant> {
        let rx = self.start_rx.as_mut()?;
        let start_at = rx.await.ok();
        self.start_rx = None;
        start_at
    }
}

impl Drop for QueuedTicket {
    fn drop(&mut self) {
        let Some(mut rx) = self.start_rx.take() else {
            return;
        };
        let mut state = self.inner.state();
        if let Some(pos) = state.queue.iter().position(|w| w.ticket == self.ticket) {
            state.queue.remove(pos);
            return;
        }
        // Dispatched but never observed: hand the slot back.
        if rx.try_recv().is_ok() {
            drop(state);
            self.inner.release();
        }
    }
}

/// A running slot. Dropping it (on completion or cancellation) frees the slot.
struct Slot {
    inner: Arc<Inner>,
}

impl Slot {
    fn finish(self, ok: bool) {
        let counter = if ok {
            &self.inner.completed
        } else {
            &self.inner.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.inner.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::AtomicUsize;

    fn limiter(max_concurrent: usize, min_delay_ms: u64) -> ChannelLimiter {
        ChannelLimiter::new("test", ChannelConfig::new(max_concurrent, min_delay_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn running_never_exceeds_max_concurrent() {
        let limiter = limiter(2, 0);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..10).map(|i| {
            let active = active.clone();
            let peak = peak.clone();
            let limiter = limiter.clone();
            async move {
                limiter
                    .execute(async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        assert!(now <= 2, "{now} tasks running");
                        tokio::time::sleep(Duration::from_millis(10 + i)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(i)
                    })
                    .await
            }
        });
        let results = join_all(tasks).await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert!(results.iter().all(|r| r.is_ok()));
        let stats = limiter.stats();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.completed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn two_slots_five_tasks_take_three_rounds() {
        let limiter = limiter(2, 0);
        let start = Instant::now();
        let tasks = (0..5).map(|_| {
            limiter.execute(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, String>(())
            })
        });
        join_all(tasks).await;
        assert_eq!(start.elapsed(), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn min_delay_spaces_invocation_starts() {
        let limiter = limiter(3, 100);
        let origin = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));

        let tasks = (0..4).map(|i| {
            let starts = starts.clone();
            limiter.execute(async move {
                starts.lock().unwrap().push((i, origin.elapsed()));
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, String>(())
            })
        });
        join_all(tasks).await;

        let starts = starts.lock().unwrap().clone();
        let order: Vec<_> = starts.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        for pair in starts.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(100), "{starts:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn starts_follow_submission_order() {
        let limiter = limiter(1, 0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let tasks = (0..5).map(|i| {
            let order = order.clone();
            limiter.execute(async move {
                order.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, String>(())
            })
        });
        join_all(tasks).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_affect_other_tasks() {
        let limiter = limiter(1, 0);
        let tasks = (0..4).map(|i| {
            limiter.execute(async move {
                if i == 1 {
                    Err(format!("task {i} failed"))
                } else {
                    Ok(i)
                }
            })
        });
        let results = join_all(tasks).await;
        assert_eq!(
            results,
            vec![Ok(0), Err("task 1 failed".to_string()), Ok(2), Ok(3)]
        );
        let stats = limiter.stats();
        assert_eq!((stats.completed, stats.failed), (3, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_tasks_release_queue_position_and_slot() {
        let limiter = limiter(1, 0);
        let blocker = tokio::spawn({
            let limiter = limiter.clone();
            async move {
                limiter
                    .execute(async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, String>(())
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;
        assert_eq!(limiter.stats().running, 1);

        // Queued behind the blocker, then abandoned.
        let queued = tokio::time::timeout(
            Duration::from_millis(10),
            limiter.execute(async { Ok::<_, String>(()) }),
        )
        .await;
        assert!(queued.is_err());
        assert_eq!(limiter.stats().queued, 0);

        blocker.abort();
        let _ = blocker.await;
        assert_eq!(limiter.stats().running, 0);

        let ok = limiter.execute(async { Ok::<_, String>(5) }).await;
        assert_eq!(ok, Ok(5));
    }

    #[tokio::test]
    async fn dropping_pending_calls_frees_queue_and_slot() {
        use tokio_test::{assert_pending, task};

        let limiter = limiter(1, 0);
        let mut first = task::spawn(limiter.execute(std::future::pending::<Result<(), String>>()));
        assert_pending!(first.poll());
        let mut second = task::spawn(limiter.execute(async { Ok::<_, String>(()) }));
        assert_pending!(second.poll());

        let stats = limiter.stats();
        assert_eq!((stats.running, stats.queued), (1, 1));

        drop(second);
        assert_eq!(limiter.stats().queued, 0);
        drop(first);
        assert_eq!(limiter.stats().running, 0);
    }
}
