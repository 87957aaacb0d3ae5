//! Error types for the pagelens library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal**: the operation cannot proceed at all
//!   (invalid configuration, every model in a chain exhausted, a page task
//!   that panicked). Returned as `Err(ExtractError)` from invoker and
//!   resilience call sites.
//!
//! * Per-step failures are **values**, not errors: the planner and the step
//!   executor always return a well-formed [`crate::plan::PageAnalysis`] or
//!   [`crate::record::StepResult`], converting any failure into a fallback
//!   plan or a `success = false` result. The merger's fallback ladder is the
//!   last line of defence, guaranteeing a non-empty page record.
//!
//! [`ErrorKind`] is the classification taxonomy: a best-effort keyword match
//! against error text, used to decide whether a failure is worth retrying.

use thiserror::Error;

/// Fatal errors returned by pagelens.
///
/// Step-level failures are stored inside [`crate::record::StepResult`]
/// rather than propagated here.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// A model invocation failed. API failures are returned as values by the
    /// [`crate::invoker::ModelInvoker`] contract; this wraps both those and
    /// unexpected transport faults, which callers must treat identically.
    #[error("model '{model}' invocation failed: {message}")]
    InvokeFailed { model: String, message: String },

    /// The circuit breaker is open; no call was attempted.
    #[error("circuit breaker is open; call blocked")]
    CircuitOpen,

    /// Every model in a fallback chain failed.
    #[error("all {attempts} models in the fallback chain failed; last error: {last}")]
    AllModelsFailed { attempts: usize, last: String },

    /// No invoker registered for the requested model name.
    #[error("no invoker registered for model '{model}'")]
    UnknownModel { model: String },

    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A whole page task failed outright (orchestrator-level).
    #[error("page {page} processing failed: {detail}")]
    PageFailed { page: u32, detail: String },

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Classify this error for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::InvokeFailed { message, .. } => ErrorKind::classify(message),
            ExtractError::CircuitOpen => ErrorKind::Api,
            ExtractError::AllModelsFailed { last, .. } => ErrorKind::classify(last),
            _ => ErrorKind::Unknown,
        }
    }
}

/// Best-effort classification of a model-call failure.
///
/// Derived from error text and finish-reason markers, not from structured
/// provider responses, so it is a heuristic: good enough to route retry
/// policy, never a proof of the underlying cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Response shape
    NoContent,
    EmptyResponse,
    MalformedResponse,
    JsonDecode,
    Truncated,
    // API limits
    TokenLimit,
    RateLimit,
    QuotaExceeded,
    // Safety and filters
    SafetyBlocked,
    ContentFiltered,
    // Transport
    Timeout,
    Connection,
    Api,
    Unknown,
}

/// Markers indicating the response was cut off by a token budget.
const TOKEN_LIMIT_INDICATORS: &[&str] = &[
    "token",
    "truncated",
    "max_tokens",
    "exceeded",
    "response exceeded",
    "maximum context length",
];

/// Markers indicating safety filtering or refusal.
const SAFETY_INDICATORS: &[&str] = &[
    "safety",
    "blocked",
    "copyright",
    "content policy",
    "usage policies",
    "refused",
];

/// Markers indicating recitation / content filtering (partial output).
const FILTER_INDICATORS: &[&str] = &["recitation", "filtered out", "content was filtered"];

/// Markers indicating transport-level trouble.
const CONNECTION_INDICATORS: &[&str] = &[
    "connection",
    "network",
    "connect failed",
    "reset",
    "ssl",
    "certificate",
    "dns",
];

/// Markers indicating a retryable server-side API failure.
const API_INDICATORS: &[&str] = &[
    "server error",
    "api error",
    "500",
    "502",
    "503",
    "504",
    "unavailable",
    "overloaded",
];

impl ErrorKind {
    /// Classify an error message by keyword matching.
    ///
    /// Ordering matters: the most specific categories are checked first so
    /// that e.g. "rate limit exceeded" lands on `RateLimit`, not
    /// `TokenLimit` via the generic "exceeded" marker.
    pub fn classify(message: &str) -> ErrorKind {
        if message.is_empty() {
            return ErrorKind::Unknown;
        }
        let lower = message.to_lowercase();
        let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
        {
            ErrorKind::RateLimit
        } else if lower.contains("quota") {
            ErrorKind::QuotaExceeded
        } else if has(FILTER_INDICATORS) {
            ErrorKind::ContentFiltered
        } else if has(SAFETY_INDICATORS) {
            ErrorKind::SafetyBlocked
        } else if has(TOKEN_LIMIT_INDICATORS) {
            ErrorKind::TokenLimit
        } else if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("deadline")
        {
            ErrorKind::Timeout
        } else if has(CONNECTION_INDICATORS) {
            ErrorKind::Connection
        } else if has(API_INDICATORS) {
            ErrorKind::Api
        } else if lower.contains("json") || lower.contains("decode") {
            ErrorKind::JsonDecode
        } else if lower.contains("empty response") {
            ErrorKind::EmptyResponse
        } else if lower.contains("no content") {
            ErrorKind::NoContent
        } else {
            ErrorKind::Unknown
        }
    }

    /// Whether a failure of this kind is worth retrying.
    ///
    /// Timeouts, connection errors, 5xx, rate limits and token limits are
    /// transient. Safety blocks and other client errors never retry.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Connection
                | ErrorKind::Api
                | ErrorKind::RateLimit
                | ErrorKind::TokenLimit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rate_limit_before_token_limit() {
        // "exceeded" alone is a token-limit marker; "rate limit" must win.
        assert_eq!(ErrorKind::classify("Rate limit exceeded"), ErrorKind::RateLimit);
        assert_eq!(ErrorKind::classify("HTTP 429"), ErrorKind::RateLimit);
    }

    #[test]
    fn classify_token_limit() {
        assert_eq!(
            ErrorKind::classify("response exceeded max_tokens"),
            ErrorKind::TokenLimit
        );
        assert_eq!(
            ErrorKind::classify("maximum context length is 8192"),
            ErrorKind::TokenLimit
        );
    }

    #[test]
    fn classify_safety_and_filter() {
        assert_eq!(
            ErrorKind::classify("blocked by safety filters"),
            ErrorKind::SafetyBlocked
        );
        assert_eq!(
            ErrorKind::classify("finish_reason: RECITATION"),
            ErrorKind::ContentFiltered
        );
        assert!(!ErrorKind::classify("content was filtered").is_transient());
    }

    #[test]
    fn classify_transport() {
        assert_eq!(ErrorKind::classify("read timed out"), ErrorKind::Timeout);
        assert_eq!(
            ErrorKind::classify("connection reset by peer"),
            ErrorKind::Connection
        );
        assert_eq!(ErrorKind::classify("503 Service Unavailable"), ErrorKind::Api);
        assert!(ErrorKind::classify("503 Service Unavailable").is_transient());
    }

    #[test]
    fn classify_empty_is_unknown() {
        assert_eq!(ErrorKind::classify(""), ErrorKind::Unknown);
        assert!(!ErrorKind::Unknown.is_transient());
    }

    #[test]
    fn error_kind_via_extract_error() {
        let e = ExtractError::InvokeFailed {
            model: "m".into(),
            message: "request timed out".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Timeout);
    }
}
