//! Token-limit boost: one focused retry with a much larger budget.
//!
//! When a call fails because the response exceeded `max_tokens`, the cheap
//! fix is to run it once more with a generous limit. Any other failure
//! propagates immediately — this wrapper retries exactly one category of
//! error, exactly once.

use crate::error::{ErrorKind, ExtractError};
use std::future::Future;
use tracing::info;

/// Retry-once-with-more-tokens wrapper.
#[derive(Debug, Clone, Copy)]
pub struct TokenBoost {
    boost_value: u32,
}

impl TokenBoost {
    pub fn new(boost_value: u32) -> Self {
        Self { boost_value }
    }

    /// Run `op(max_tokens)`; on a token-limit failure, run it once more with
    /// the boost value. All other parameters are the caller's to preserve
    /// inside `op`.
    pub async fn execute<T, F, Fut>(&self, max_tokens: u32, mut op: F) -> Result<T, ExtractError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExtractError>>,
    {
        match op(max_tokens).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == ErrorKind::TokenLimit => {
                info!(
                    original = max_tokens,
                    boosted = self.boost_value,
                    "token limit hit; retrying with boosted budget"
                );
                op(self.boost_value).await
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn boosts_exactly_once_on_token_limit() {
        let seen = Mutex::new(Vec::new());
        let boost = TokenBoost::new(100_000);

        let result = boost
            .execute(4_000, |max_tokens| {
                seen.lock().unwrap().push(max_tokens);
                async move {
                    if max_tokens == 4_000 {
                        Err(ExtractError::InvokeFailed {
                            model: "m".into(),
                            message: "response exceeded max_tokens".into(),
                        })
                    } else {
                        Ok(max_tokens)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 100_000);
        assert_eq!(*seen.lock().unwrap(), vec![4_000, 100_000]);
    }

    #[tokio::test]
    async fn non_token_errors_propagate_without_retry() {
        let seen = Mutex::new(0u32);
        let boost = TokenBoost::new(100_000);

        let result: Result<(), _> = boost
            .execute(4_000, |_| {
                *seen.lock().unwrap() += 1;
                async {
                    Err(ExtractError::InvokeFailed {
                        model: "m".into(),
                        message: "blocked by safety filters".into(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn second_failure_propagates() {
        let boost = TokenBoost::new(50_000);
        let result: Result<(), _> = boost
            .execute(4_000, |_| async {
                Err(ExtractError::InvokeFailed {
                    model: "m".into(),
                    message: "truncated".into(),
                })
            })
            .await;
        assert!(result.is_err());
    }
}
