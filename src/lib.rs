//! # pagelens
//!
//! Model-routed structured extraction for multi-page documents.
//!
//! ## Why this crate?
//!
//! One-size-fits-all extraction prompts fail on real documents: a dense
//! financial table, a diagram-heavy slide and a plain prose page need
//! different prompts, budgets and output shapes. pagelens lets a vision
//! model *plan* each page first — classify its complexity, inventory its
//! content, and emit a step-by-step extraction plan — then executes that
//! plan step by step and merges the pieces into one canonical record per
//! page. Every stage degrades instead of failing, so a page always yields a
//! record, down to a raw-text fallback.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document pages
//!  │
//!  ├─ 1. Plan     router analyzes each page → strategy steps + budgets
//!  ├─ 2. Execute  one model call per step (timeout, token boost, retries)
//!  ├─ 3. Merge    per-strategy folding, chunked-table reassembly, dedup
//!  ├─ 4. Refine   optional re-extraction of table-like prose sections
//!  └─ 5. Collect  records in page order; failed pages logged and excluded
//! ```
//!
//! Pages run concurrently under a semaphore and a shared per-minute rate
//! limiter. Model access goes through the [`ModelInvoker`] trait — this
//! crate never talks to a provider directly, so any backend (or a test mock)
//! plugs in behind a [`ModelRegistry`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagelens::{process_document, ModelRegistry, PageSource, PipelineConfig, StaticPage};
//! use std::sync::Arc;
//!
//! # async fn demo(invoker: Arc<dyn pagelens::ModelInvoker>) {
//! let registry = Arc::new(ModelRegistry::new(invoker));
//! let config = PipelineConfig::builder()
//!     .concurrency_limit(5)
//!     .target_lang("en")
//!     .build()
//!     .unwrap();
//!
//! let pages: Vec<Arc<dyn PageSource>> = vec![
//!     Arc::new(StaticPage::text_only(1, "Quarterly report ...")),
//! ];
//! let records = process_document(registry, config, pages).await;
//! for record in &records {
//!     println!("page {}: {:?}", record.metadata.page_number, record.main_title);
//! }
//! # }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod invoker;
pub mod jsonscan;
pub mod page;
pub mod pipeline;
pub mod plan;
pub mod prompts;
pub mod record;
pub mod resilience;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, RefinementThresholds};
pub use error::{ErrorKind, ExtractError};
pub use invoker::{ContentPart, ModelInvoker, ModelRegistry, ModelResponse, Usage, UsageTracker};
pub use page::{PageSource, StaticPage};
pub use pipeline::{process_document, DocumentProcessor};
pub use plan::{PageAnalysis, PlanStep, Strategy};
pub use record::{PageRecord, RefinementDecision, Section, StepResult, Table};
