//! Circuit breaker for a repeatedly failing model backend.
//!
//! States: CLOSED → OPEN → HALF_OPEN → CLOSED. Consecutive failures while
//! CLOSED open the circuit; all calls are then blocked (no invocation
//! attempted) for the recovery window. The OPEN → HALF_OPEN transition is
//! evaluated lazily on state read — time-based, no background timer. In
//! HALF_OPEN a small number of trial calls is allowed: any failure reopens
//! the circuit, enough consecutive successes close it.

use crate::error::ExtractError;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker state, as visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// An async-compatible circuit breaker.
///
/// The internal lock is held only for state bookkeeping, never across an
/// await, so concurrent page tasks share one breaker safely.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_attempts: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration, half_open_attempts: u32) -> Self {
        assert!(failure_threshold >= 1, "failure threshold must be at least 1");
        Self {
            failure_threshold,
            recovery_timeout,
            half_open_attempts: half_open_attempts.max(1),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Current state, applying the lazy OPEN → HALF_OPEN transition.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    fn maybe_half_open(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed >= self.recovery_timeout {
                info!("circuit breaker: OPEN -> HALF_OPEN");
                inner.state = BreakerState::HalfOpen;
                inner.half_open_successes = 0;
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.half_open_attempts {
                    info!("circuit breaker: HALF_OPEN -> CLOSED");
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                }
            }
            _ => inner.failure_count = 0,
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::HalfOpen => {
                warn!("circuit breaker: HALF_OPEN probe failed, reopening");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            _ => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    warn!(
                        failures = inner.failure_count,
                        "circuit breaker: CLOSED -> OPEN"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }

    /// Run `op` if the circuit allows it.
    ///
    /// Returns [`ExtractError::CircuitOpen`] without invoking `op` while the
    /// circuit is open.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ExtractError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ExtractError>>,
    {
        if self.state() == BreakerState::Open {
            return Err(ExtractError::CircuitOpen);
        }
        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }
}
