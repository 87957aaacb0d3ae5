//! Retry with exponential backoff and jitter.
//!
//! Delay grows as `initial_delay * backoff_base^attempt`, with 10–50 %
//! random jitter added so N concurrent page tasks do not retry in lockstep
//! against a recovering endpoint. Only transient failures are retried; the
//! final error propagates once attempts are exhausted.

use crate::error::{ErrorKind, ExtractError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for transient model-call failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: f64,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: f64) -> Self {
        Self {
            max_attempts,
            backoff_base,
            ..Self::default()
        }
    }

    /// Delay before the retry following `attempt` (0-indexed), jittered.
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_base.powi(attempt as i32);
        let jitter = base * rand::thread_rng().gen_range(0.1..0.5);
        Duration::from_secs_f64((base + jitter).min(self.max_delay.as_secs_f64()))
    }

    /// Run `op` up to `max_attempts` times.
    ///
    /// Non-transient failures propagate immediately; the last transient
    /// failure propagates after the attempts are spent.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, ExtractError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExtractError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    // A token-limit failure repeats identically at the same
                    // budget; the token boost wrapper owns that category.
                    if !e.kind().is_transient()
                        || e.kind() == ErrorKind::TokenLimit
                        || attempt + 1 == attempts
                    {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure; backing off"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        // Unreachable: the loop returns on the final attempt.
        Err(last_err.unwrap_or_else(|| ExtractError::Internal("retry exhausted".into())))
    }
}
