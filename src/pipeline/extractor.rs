//! Step execution: run one plan step against the extraction model.
//!
//! One step is one model call (plus whatever the resilience stack adds
//! underneath): the strategy's prompt template, the page image when
//! renderable, the step's token budget, a low temperature and a timeout
//! scaled by the step's estimated complexity. The raw response text is then
//! scanned for its first JSON object.
//!
//! Execution **never panics and never errors**: every outcome, including a
//! response with no parseable JSON, is folded into a [`StepResult`] so the
//! merger downstream always sees the full step list.

use crate::config::PipelineConfig;
use crate::invoker::{ContentPart, ModelInvoker, ModelRegistry, UsageTracker};
use crate::jsonscan;
use crate::page::PageSource;
use crate::plan::PlanStep;
use crate::prompts::{self, EXTRACTOR_SYSTEM};
use crate::record::StepResult;
use crate::resilience::{CircuitBreaker, ResilientInvoker, RetryPolicy, TokenBoost};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Timeout for a step the planner marked as high complexity.
const HIGH_COMPLEXITY_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout for every other step.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);
/// Extraction runs near-deterministic.
const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// Consecutive failures before the extraction circuit opens.
const BREAKER_FAILURE_THRESHOLD: u32 = 5;
/// Cooldown before the open circuit admits trial calls again.
const BREAKER_RECOVERY: Duration = Duration::from_secs(30);
/// Trial successes required to close the circuit.
const BREAKER_HALF_OPEN_ATTEMPTS: u32 = 2;

/// The step executor: turns one [`PlanStep`] into one [`StepResult`].
pub struct Extractor {
    invoker: Arc<dyn ModelInvoker>,
    usage: Arc<UsageTracker>,
    model: String,
    token_boost: TokenBoost,
    anti_recitation: bool,
}

impl Extractor {
    /// Build the executor, wrapping the registry's extraction invoker in the
    /// standard resilience stack.
    pub fn new(
        registry: &ModelRegistry,
        usage: Arc<UsageTracker>,
        config: &PipelineConfig,
    ) -> Self {
        let resilient = ResilientInvoker::new(
            registry.resolve(&config.extraction_model),
            RetryPolicy::new(config.retry_max_attempts, config.retry_backoff_base),
            CircuitBreaker::new(
                BREAKER_FAILURE_THRESHOLD,
                BREAKER_RECOVERY,
                BREAKER_HALF_OPEN_ATTEMPTS,
            ),
        );
        Self {
            invoker: Arc::new(resilient),
            usage,
            model: config.extraction_model.clone(),
            token_boost: TokenBoost::new(config.token_boost_value),
            anti_recitation: config.anti_recitation,
        }
    }

    /// Execute one plan step against one page. Infallible by contract.
    pub async fn execute(
        &self,
        step: &PlanStep,
        page: &dyn PageSource,
        target_lang: &str,
    ) -> StepResult {
        let started = Instant::now();
        let tag = step.strategy.result_tag(self.anti_recitation);

        let prompt = prompts::extraction_prompt(
            &step.strategy,
            step.special_instructions.as_deref(),
            target_lang,
            self.anti_recitation,
        );
        let mut content = vec![ContentPart::text(prompt)];
        if let Some(bytes) = page.image() {
            content.push(ContentPart::png(&bytes));
        }

        let timeout = if step.estimated_complexity == "high" {
            HIGH_COMPLEXITY_TIMEOUT
        } else {
            DEFAULT_TIMEOUT
        };

        let outcome = self
            .token_boost
            .execute(step.max_tokens, |max_tokens| {
                self.invoker.invoke(
                    &self.model,
                    &content,
                    EXTRACTOR_SYSTEM,
                    max_tokens,
                    timeout,
                    EXTRACTION_TEMPERATURE,
                )
            })
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(response) => {
                self.usage.record(&response.usage);
                if response.text.trim().is_empty() {
                    warn!(page = page.page_number(), step = step.step, "empty response from model");
                    return StepResult::failed(step.step, tag, "empty response from model", elapsed_ms);
                }
                match jsonscan::parse_first_object(&response.text) {
                    Some(parsed) => {
                        debug!(
                            page = page.page_number(),
                            step = step.step,
                            strategy = %tag,
                            tokens = response.usage.total_tokens,
                            "step extracted"
                        );
                        StepResult::ok(
                            step.step,
                            tag,
                            parsed,
                            response.usage.total_tokens,
                            elapsed_ms,
                            self.model.clone(),
                        )
                    }
                    None => {
                        warn!(
                            page = page.page_number(),
                            step = step.step,
                            "no JSON object in model response"
                        );
                        StepResult::failed(
                            step.step,
                            tag,
                            "failed to parse JSON from model response",
                            elapsed_ms,
                        )
                    }
                }
            }
            Err(e) => {
                warn!(page = page.page_number(), step = step.step, error = %e, "step failed");
                StepResult::failed(step.step, tag, e.to_string(), elapsed_ms)
            }
        }
    }
}
