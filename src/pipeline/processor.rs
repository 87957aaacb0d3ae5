//! Parallel page orchestration.
//!
//! Pages are independent once planned, so the processor fans them out with
//! bounded concurrency: a semaphore caps pages in flight and a shared
//! token-bucket rate limiter paces model traffic across all of them. Each
//! page task runs the full stage sequence (plan, execute steps in order,
//! merge, optionally refine) and yields exactly one record; a page task that
//! fails outright is logged and excluded rather than poisoning its siblings.
//!
//! Records are returned in ascending page order regardless of completion
//! order.

use crate::config::PipelineConfig;
use crate::error::ExtractError;
use crate::invoker::{ModelRegistry, UsageTracker};
use crate::page::PageSource;
use crate::pipeline::extractor::Extractor;
use crate::pipeline::merger::Merger;
use crate::pipeline::refine::RefinementAnalyzer;
use crate::pipeline::router::Router;
use crate::plan::{PlanStep, Strategy};
use crate::record::PageRecord;
use crate::resilience::RateLimiter;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Token budget for a refinement re-extraction.
const REFINEMENT_MAX_TOKENS: u32 = 20_000;

/// The document processor: one router, one extractor, one merger, shared
/// across all page tasks.
pub struct DocumentProcessor {
    router: Router,
    extractor: Extractor,
    merger: Merger,
    analyzer: RefinementAnalyzer,
    rate_limiter: Arc<RateLimiter>,
    usage: Arc<UsageTracker>,
    config: PipelineConfig,
}

impl DocumentProcessor {
    pub fn new(registry: Arc<ModelRegistry>, config: PipelineConfig) -> Self {
        Self::with_usage(registry, Arc::new(UsageTracker::new()), config)
    }

    /// Build the processor around an externally owned usage tracker, for
    /// callers that account tokens across multiple documents.
    pub fn with_usage(
        registry: Arc<ModelRegistry>,
        usage: Arc<UsageTracker>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            router: Router::new(Arc::clone(&registry), Arc::clone(&usage), &config),
            extractor: Extractor::new(&registry, Arc::clone(&usage), &config),
            merger: Merger::new(&config),
            analyzer: RefinementAnalyzer::new(config.refinement.clone()),
            rate_limiter: Arc::new(RateLimiter::per_minute(config.rate_limit_per_minute)),
            usage,
            config,
        }
    }

    /// Total tokens recorded across every model call so far.
    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Process a whole document: one record per page, in page order.
    ///
    /// A page whose task fails is logged and excluded; the other pages are
    /// unaffected.
    pub async fn process_document(&self, pages: Vec<Arc<dyn PageSource>>) -> Vec<PageRecord> {
        let total = pages.len();
        info!(pages = total, concurrency = self.config.concurrency_limit, "processing document");
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit));

        let outcomes: Vec<Result<PageRecord, ExtractError>> = stream::iter(pages)
            .map(|page| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|e| ExtractError::Internal(e.to_string()))?;
                    self.process_page(page.as_ref()).await
                }
            })
            .buffer_unordered(self.config.concurrency_limit)
            .collect()
            .await;

        let mut records: Vec<PageRecord> = outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(record) => Some(record),
                Err(e) => {
                    error!(error = %e, "page task failed; excluding page from results");
                    None
                }
            })
            .collect();
        records.sort_by_key(|r| r.metadata.page_number);

        info!(
            pages = total,
            records = records.len(),
            total_tokens = self.usage.total_tokens(),
            "document processed"
        );
        records
    }

    /// The full stage sequence for one page.
    async fn process_page(&self, page: &dyn PageSource) -> Result<PageRecord, ExtractError> {
        let page_number = page.page_number();
        self.rate_limiter.acquire().await;

        let analysis = self.router.analyze(page, &self.config.target_lang).await;
        debug!(
            page = page_number,
            complexity = %analysis.page_complexity,
            steps = analysis.extraction_plans.len(),
            "page planned"
        );

        // Steps run sequentially: later steps may depend on budget left over
        // from earlier ones, and a single page rarely merits a nested fan-out.
        let mut results = Vec::with_capacity(analysis.extraction_plans.len());
        for step in &analysis.extraction_plans {
            results.push(
                self.extractor
                    .execute(step, page, &self.config.target_lang)
                    .await,
            );
        }

        let raw_text = if self.config.fallback_to_raw_text {
            page.text()
        } else {
            None
        };
        let mut record =
            self.merger
                .merge(&results, &analysis, raw_text.as_deref(), page_number);

        if self.config.iterative_refinement_enabled {
            record = self.refine(record, page).await;
        }
        Ok(record)
    }

    /// One optional self-correction round for a likely missed table.
    async fn refine(&self, mut record: PageRecord, page: &dyn PageSource) -> PageRecord {
        let decision = self.analyzer.analyze_for_missed_tables(&mut record);
        let target_id = match decision.target_section_id {
            Some(id) if decision.should_refine => id,
            _ => return record,
        };
        info!(
            page = page.page_number(),
            "refinement: re-extracting a table-like section"
        );

        let step = PlanStep::new(
            (record.total_steps + 1) as u32,
            Strategy::TableFocus,
            "Refinement: focused table extraction",
            REFINEMENT_MAX_TOKENS,
        );
        let refined = self
            .extractor
            .execute(&step, page, &self.config.target_lang)
            .await;
        self.merger.merge_refined(record, &refined, &target_id)
    }
}

/// Convenience entry point: process `pages` with a fresh processor.
pub async fn process_document(
    registry: Arc<ModelRegistry>,
    config: PipelineConfig,
    pages: Vec<Arc<dyn PageSource>>,
) -> Vec<PageRecord> {
    DocumentProcessor::new(registry, config).process_document(pages).await
}
