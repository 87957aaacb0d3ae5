//! The capability boundary: a uniform contract for calling a named model.
//!
//! The pipeline never talks HTTP or provider SDKs. Everything it needs from
//! the outside world is the [`ModelInvoker`] trait: hand over ordered content
//! parts, a system prompt and budget/timeout parameters, get back text plus
//! usage — or an error value. Ordinary API failures are `Err` values carrying
//! the provider's message; truly unexpected faults surface the same way, and
//! callers treat both identically for retry purposes.
//!
//! Routing a logical model name to a backing integration is the job of
//! [`ModelRegistry`], an explicit table resolved once at configuration time.
//! Cross-call token accounting lives in [`UsageTracker`], an injected atomic
//! accumulator owned at this boundary.

use crate::error::ExtractError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One ordered part of a multimodal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    /// Plain instruction or context text.
    Text { text: String },
    /// A base64-encoded image attachment.
    Image {
        media_type: String,
        base64_data: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Encode raw image bytes as a base64 PNG attachment.
    pub fn png(bytes: &[u8]) -> Self {
        use base64::Engine as _;
        ContentPart::Image {
            media_type: "image/png".to_string(),
            base64_data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// Token accounting for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A successful model response.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub usage: Usage,
}

/// Uniform capability contract for a named model.
///
/// Implementations map the call onto whatever backing service serves the
/// model name; the pipeline only sees this one signature.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(
        &self,
        model: &str,
        content: &[ContentPart],
        system: &str,
        max_tokens: u32,
        timeout: Duration,
        temperature: f32,
    ) -> Result<ModelResponse, ExtractError>;
}

/// Process-wide token accounting, shared by injection rather than as
/// ambient global state.
#[derive(Debug, Default)]
pub struct UsageTracker {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    calls: AtomicU64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one call's usage.
    pub fn record(&self, usage: &Usage) {
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens.load(Ordering::Relaxed)
    }

    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens.load(Ordering::Relaxed)
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens() + self.completion_tokens()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

/// Explicit `model name → invoker` routing table.
///
/// Built once at configuration time. A default invoker serves any model
/// without a dedicated entry, so a single-backend deployment registers
/// nothing at all.
pub struct ModelRegistry {
    default: Arc<dyn ModelInvoker>,
    routes: HashMap<String, Arc<dyn ModelInvoker>>,
}

impl ModelRegistry {
    pub fn new(default: Arc<dyn ModelInvoker>) -> Self {
        Self {
            default,
            routes: HashMap::new(),
        }
    }

    /// Route a specific model name to a dedicated invoker.
    pub fn register(mut self, model: impl Into<String>, invoker: Arc<dyn ModelInvoker>) -> Self {
        self.routes.insert(model.into(), invoker);
        self
    }

    /// Resolve the invoker for a model name.
    pub fn resolve(&self, model: &str) -> Arc<dyn ModelInvoker> {
        self.routes
            .get(model)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}
