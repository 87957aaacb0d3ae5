//! Model fallback chain: try each model in order until one succeeds.

use crate::error::ExtractError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Record of one attempt against one model in the chain.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub model: String,
    pub error: Option<String>,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// An ordered list of alternative models for one logical operation.
pub struct FallbackChain {
    models: Vec<String>,
    /// Pause between attempts, giving a struggling backend a beat to recover.
    pause: Duration,
}

impl FallbackChain {
    pub fn new(models: Vec<String>) -> Result<Self, ExtractError> {
        if models.is_empty() {
            return Err(ExtractError::InvalidConfig(
                "fallback chain requires at least one model".into(),
            ));
        }
        Ok(Self {
            models,
            pause: Duration::from_millis(200),
        })
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Run `op` against each model in order; first success wins.
    ///
    /// Returns the successful value together with per-attempt records. If
    /// every model fails, the last failure is wrapped in
    /// [`ExtractError::AllModelsFailed`].
    pub async fn execute<T, F, Fut>(
        &self,
        mut op: F,
    ) -> Result<(T, Vec<AttemptRecord>), ExtractError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ExtractError>>,
    {
        let mut attempts = Vec::with_capacity(self.models.len());
        let mut last_err: Option<ExtractError> = None;

        for (i, model) in self.models.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pause).await;
            }
            match op(model.clone()).await {
                Ok(value) => {
                    attempts.push(AttemptRecord {
                        model: model.clone(),
                        error: None,
                    });
                    return Ok((value, attempts));
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "fallback chain attempt failed");
                    attempts.push(AttemptRecord {
                        model: model.clone(),
                        error: Some(e.to_string()),
                    });
                    last_err = Some(e);
                }
            }
        }

        Err(ExtractError::AllModelsFailed {
            attempts: attempts.len(),
            last: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".into()),
        })
    }
}
