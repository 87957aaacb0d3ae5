//! Page analysis: plan an extraction strategy for one page.
//!
//! The router sends one vision+text request (the instructional prompt, a
//! bounded preview of the page text, and the page image when renderable) to
//! its primary model, falling back through the configured model chain with a
//! fixed pause between attempts. The first response containing any text is
//! parsed; everything after that is local.
//!
//! The router **never fails**: JSON that cannot be located or decoded, and
//! a fully exhausted model chain, both collapse into the deterministic
//! single-step fallback plan with a warning on record. A page always gets a
//! usable [`PageAnalysis`].

use crate::config::PipelineConfig;
use crate::error::ExtractError;
use crate::invoker::{ContentPart, ModelRegistry, UsageTracker};
use crate::jsonscan;
use crate::page::PageSource;
use crate::plan::{PageAnalysis, PlanStep};
use crate::prompts::{self, ROUTER_SYSTEM};
use crate::resilience::FallbackChain;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Characters of page text included as a preview in the analysis request.
const TEXT_PREVIEW_CHARS: usize = 500;
/// Token budget for the analysis response itself.
const ANALYSIS_MAX_TOKENS: u32 = 3_000;
/// Timeout for one analysis call.
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(120);
/// Pause between attempts on the model chain.
const CHAIN_PAUSE: Duration = Duration::from_secs(1);

/// The planner: analyzes one page into a step-by-step extraction plan.
pub struct Router {
    registry: Arc<ModelRegistry>,
    usage: Arc<UsageTracker>,
    model: String,
    fallback_models: Vec<String>,
}

impl Router {
    pub fn new(
        registry: Arc<ModelRegistry>,
        usage: Arc<UsageTracker>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            registry,
            usage,
            model: config.router_model.clone(),
            fallback_models: config.router_fallback.clone(),
        }
    }

    /// Analyze a single page into a [`PageAnalysis`]. Infallible by contract.
    pub async fn analyze(&self, page: &dyn PageSource, target_lang: &str) -> PageAnalysis {
        let content = self.prepare_content(page, target_lang);

        let mut chain_models = Vec::with_capacity(1 + self.fallback_models.len());
        chain_models.push(self.model.clone());
        chain_models.extend(self.fallback_models.iter().cloned());

        let chain = match FallbackChain::new(chain_models) {
            Ok(chain) => chain.with_pause(CHAIN_PAUSE),
            Err(_) => return PageAnalysis::fallback(),
        };

        let outcome = chain
            .execute(|model| {
                let content = &content;
                let registry = Arc::clone(&self.registry);
                async move {
                    let response = registry
                        .resolve(&model)
                        .invoke(
                            &model,
                            content,
                            ROUTER_SYSTEM,
                            ANALYSIS_MAX_TOKENS,
                            ANALYSIS_TIMEOUT,
                            0.1,
                        )
                        .await?;
                    if response.text.trim().is_empty() {
                        return Err(ExtractError::InvokeFailed {
                            model,
                            message: "empty response from model".into(),
                        });
                    }
                    Ok(response)
                }
            })
            .await;

        match outcome {
            Ok((response, attempts)) => {
                self.usage.record(&response.usage);
                debug!(
                    page = page.page_number(),
                    attempts = attempts.len(),
                    "router analysis response received"
                );
                parse_analysis(&response.text).unwrap_or_else(|| {
                    warn!(page = page.page_number(), "failed to parse router response");
                    PageAnalysis::fallback()
                })
            }
            Err(e) => {
                warn!(page = page.page_number(), error = %e, "router model chain exhausted");
                PageAnalysis::fallback()
            }
        }
    }

    /// Build the vision+text payload for the analysis request.
    ///
    /// A page that cannot render degrades to text-only analysis.
    fn prepare_content(&self, page: &dyn PageSource, target_lang: &str) -> Vec<ContentPart> {
        let text = page.text();
        let prompt = prompts::router_prompt(text.as_deref(), target_lang, TEXT_PREVIEW_CHARS);

        let mut content = vec![ContentPart::text(prompt)];
        match page.image() {
            Some(bytes) => content.push(ContentPart::png(&bytes)),
            None => debug!(
                page = page.page_number(),
                "no page image; proceeding with text-only analysis"
            ),
        }
        content
    }
}

/// Parse the router's JSON response into a [`PageAnalysis`].
///
/// Locates the first top-level JSON object in the raw text, unwraps one
/// `document_analysis` nesting level if present, and maps the fields. Any
/// undecodable plan step invalidates the whole response (`None`), which the
/// caller converts into the fallback plan.
fn parse_analysis(text: &str) -> Option<PageAnalysis> {
    let mut data = jsonscan::parse_first_object(text)?;
    if let Some(inner) = data.get("document_analysis") {
        data = inner.clone();
    }

    let plans: Vec<PlanStep> = match data.get("extraction_plans").and_then(Value::as_array) {
        Some(raw_plans) => raw_plans
            .iter()
            .map(|p| serde_json::from_value(p.clone()))
            .collect::<Result<_, _>>()
            .ok()?,
        None => Vec::new(),
    };

    let content = data
        .get("content_analysis")
        .cloned()
        .unwrap_or(Value::Null);

    Some(PageAnalysis {
        page_complexity: data
            .get("page_complexity")
            .and_then(Value::as_str)
            .unwrap_or("moderate")
            .to_string(),
        has_dense_table: content
            .get("has_dense_table")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        table_info: content.get("table_info").filter(|v| !v.is_null()).cloned(),
        text_sections: content
            .get("text_sections")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        visual_elements: content
            .get("visual_elements")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        extraction_plans: plans,
        total_estimated_tokens: data
            .get("total_estimated_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(10_000),
        warnings: data
            .get("warnings")
            .and_then(Value::as_array)
            .map(|w| {
                w.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}
