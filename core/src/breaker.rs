//! Closed / open / half-open circuit breaker for one external dependency.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error, PartialEq)]
pub enum BreakerError<E> {
    #[error("circuit '{name}' is open, retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    /// Time since the last failure, if any.
    pub since_last_failure: Option<Duration>,
}

struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    /// Bumped every time the circuit opens; outcomes of calls admitted under
    /// an older generation are ignored.
    generation: u64,
    probe_in_flight: bool,
}

/// How a call got past [`CircuitBreaker::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Closed { generation: u64 },
    Probe,
}

struct BreakerInner {
    name: String,
    failure_threshold: u32,
    open_timeout: Duration,
    state: Mutex<BreakerState>,
}

/// Opens after `failure_threshold` consecutive failures and rejects calls
/// until `open_timeout` has passed since the last one. The next call is then
/// let through as a single probe while concurrent callers keep being
/// rejected: success closes the circuit, failure reopens it.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(BreakerInner {
                name: name.into(),
                failure_threshold: failure_threshold.max(1),
                open_timeout,
                state: Mutex::new(BreakerState {
                    state: CircuitState::Closed,
                    failures: 0,
                    last_failure: None,
                    generation: 0,
                    probe_in_flight: false,
                }),
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, cfg: &BreakerConfig) -> Self {
        Self::new(
            name,
            cfg.failure_threshold,
            Duration::from_millis(cfg.open_timeout_ms),
        )
    }

    fn state(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub async fn call<F, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let admission = self.admit()?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };
        let outcome = op.await;
        guard.armed = false;
        match outcome {
            Ok(value) => {
                self.record_success(admission);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(admission);
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn admit<E>(&self) -> Result<Admission, BreakerError<E>> {
        let mut st = self.state();
        match st.state {
            CircuitState::Closed => {
                return Ok(Admission::Closed {
                    generation: st.generation,
                })
            }
            CircuitState::HalfOpen if !st.probe_in_flight => {
                st.probe_in_flight = true;
                return Ok(Admission::Probe);
            }
            CircuitState::HalfOpen => {
                return Err(BreakerError::Open {
                    name: self.inner.name.clone(),
                    retry_in: Duration::ZERO,
                })
            }
            CircuitState::Open => {}
        }
        let elapsed = st.last_failure.map_or(self.inner.open_timeout, |t| t.elapsed());
        if elapsed >= self.inner.open_timeout {
            tracing::info!(breaker = %self.inner.name, "circuit half-open, attempting recovery");
            st.state = CircuitState::HalfOpen;
            st.probe_in_flight = true;
            return Ok(Admission::Probe);
        }
        Err(BreakerError::Open {
            name: self.inner.name.clone(),
            retry_in: self.inner.open_timeout - elapsed,
        })
    }

    fn record_success(&self, admission: Admission) {
        let mut st = self.state();
        match admission {
            Admission::Probe => {
                tracing::info!(breaker = %self.inner.name, "circuit closed after successful probe");
                st.probe_in_flight = false;
                st.state = CircuitState::Closed;
                st.failures = 0;
            }
            Admission::Closed { generation } => {
                if st.state == CircuitState::Closed && st.generation == generation {
                    st.failures = 0;
                }
            }
        }
    }

    fn record_failure(&self, admission: Admission) {
        let mut st = self.state();
        match admission {
            Admission::Probe => {
                st.probe_in_flight = false;
                st.failures = st.failures.saturating_add(1);
                st.last_failure = Some(Instant::now());
                self.open(&mut st);
            }
            Admission::Closed { generation } => {
                if st.state != CircuitState::Closed || st.generation != generation {
                    return;
                }
                st.failures = st.failures.saturating_add(1);
                st.last_failure = Some(Instant::now());
                if st.failures >= self.inner.failure_threshold {
                    self.open(&mut st);
                }
            }
        }
    }

    fn open(&self, st: &mut BreakerState) {
        tracing::error!(breaker = %self.inner.name, failures = st.failures, "circuit opened");
        st.state = CircuitState::Open;
        st.generation = st.generation.wrapping_add(1);
    }

    pub fn status(&self) -> BreakerStatus {
        let st = self.state();
        BreakerStatus {
            name: self.inner.name.clone(),
            state: st.state,
            failures: st.failures,
            since_last_failure: st.last_failure.map(|t| t.elapsed()),
        }
    }

    pub fn reset(&self) {
        let mut st = self.state();
        st.state = CircuitState::Closed;
        st.failures = 0;
        st.last_failure = None;
        st.probe_in_flight = false;
        st.generation = st.generation.wrapping_add(1);
    }
}

/// Frees the half-open probe slot when a probe call is dropped mid-flight.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.state().probe_in_flight = false;
        }
    }
}
