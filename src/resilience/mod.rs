//! Resilience wrappers around capability invocations.
//!
//! Each wrapper is an independent decorator; they compose freely:
//!
//! * [`retry::RetryPolicy`] — exponential backoff with jitter, transient
//!   failures only
//! * [`breaker::CircuitBreaker`] — stop calling a dependency that keeps
//!   failing, for a cooldown window
//! * [`fallback::FallbackChain`] — ordered alternative models
//! * [`token_boost::TokenBoost`] — one retry with a boosted token budget
//! * [`rate_limit::RateLimiter`] — shared token-bucket gate
//!
//! [`ResilientInvoker`] is the standard composition used by the pipeline:
//! circuit breaker outside, retry inside, around any [`ModelInvoker`].

pub mod breaker;
pub mod fallback;
pub mod rate_limit;
pub mod retry;
pub mod token_boost;

pub use breaker::{BreakerState, CircuitBreaker};
pub use fallback::{AttemptRecord, FallbackChain};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use token_boost::TokenBoost;

use crate::error::ExtractError;
use crate::invoker::{ContentPart, ModelInvoker, ModelResponse};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A [`ModelInvoker`] decorator applying the standard resilience stack.
///
/// The breaker guards the whole retried operation, so a dependency that
/// fails through all retry attempts counts once against the threshold.
pub struct ResilientInvoker {
    inner: Arc<dyn ModelInvoker>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ResilientInvoker {
    pub fn new(inner: Arc<dyn ModelInvoker>, retry: RetryPolicy, breaker: CircuitBreaker) -> Self {
        Self {
            inner,
            retry,
            breaker,
        }
    }
}

#[async_trait]
impl ModelInvoker for ResilientInvoker {
    async fn invoke(
        &self,
        model: &str,
        content: &[ContentPart],
        system: &str,
        max_tokens: u32,
        timeout: Duration,
        temperature: f32,
    ) -> Result<ModelResponse, ExtractError> {
        self.breaker
            .execute(|| {
                self.retry.execute(|| {
                    self.inner
                        .invoke(model, content, system, max_tokens, timeout, temperature)
                })
            })
            .await
    }
}
