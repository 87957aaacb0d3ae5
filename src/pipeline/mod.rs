//! The extraction pipeline, stage by stage.
//!
//! ```text
//!                       ┌────────────┐
//!   page ──────────────▶│   router   │── PageAnalysis (plan)
//!                       └────────────┘
//!                             │ per plan step, in order
//!                       ┌────────────┐
//!                       │ extractor  │── StepResult (one per step)
//!                       └────────────┘
//!                             │ all step results
//!                       ┌────────────┐
//!                       │   merger   │── PageRecord
//!                       └────────────┘
//!                             │ optional, when enabled
//!                       ┌────────────┐
//!                       │   refine   │── focused re-extraction
//!                       └────────────┘
//! ```
//!
//! [`processor::DocumentProcessor`] drives this sequence for every page of a
//! document concurrently, under a shared semaphore and rate limiter.
//!
//! Stage contracts are deliberately one-sided: the router and extractor are
//! infallible (failures become fallback plans and failed step results), and
//! the merger is pure. All actual fallibility lives at the invoker boundary
//! and inside the resilience wrappers.

pub mod extractor;
pub mod merger;
pub mod processor;
pub mod refine;
pub mod router;

pub use extractor::Extractor;
pub use merger::Merger;
pub use processor::{process_document, DocumentProcessor};
pub use refine::RefinementAnalyzer;
pub use router::Router;
