//! Configuration for the extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across page tasks, log them, and diff two runs to
//! understand why their outputs differ.
//!
//! Two of the constants here deserve a note: `raw_text_redundancy_ratio` and
//! the [`RefinementThresholds`] were tuned empirically against real document
//! sets. They are configuration, not derived values; the defaults reproduce
//! the tuned behaviour and the tests pin them against concrete examples.

use crate::error::ExtractError;
use serde::{Deserialize, Serialize};

/// Configuration for a document extraction run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use pagelens::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .concurrency_limit(8)
///     .rate_limit_per_minute(120)
///     .target_lang("en")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of pages in flight at once. Range: 1–20. Default: 5.
    ///
    /// Each in-flight page holds one rate-limiter token and runs its own
    /// sequence of model calls, so this bounds both memory and burst load.
    pub concurrency_limit: usize,

    /// Model calls allowed per refill period (one minute). Default: 60.
    pub rate_limit_per_minute: u32,

    /// Maximum attempts for a transient model-call failure. Default: 3.
    ///
    /// Permanent failures (safety blocks, 4xx other than rate limit) are
    /// never retried regardless of this setting.
    pub retry_max_attempts: u32,

    /// Base for the exponential backoff delay between retries. Default: 2.0.
    pub retry_backoff_base: f64,

    /// Enable response caching in the invoker layer. Default: true.
    pub cache_enabled: bool,

    /// Time-to-live for cached responses, in seconds. Default: 3600.
    pub cache_ttl_secs: u64,

    /// Fall back to raw page text when every extraction step fails. Default: true.
    pub fallback_to_raw_text: bool,

    /// Target language for titles, summaries and insights. Default: "en".
    pub target_lang: String,

    /// Enable the self-correction pass that re-extracts sections the
    /// refinement analyzer judges to be missed tables. Default: false.
    pub iterative_refinement_enabled: bool,

    /// Use anti-recitation prompt variants for extraction steps. Default: false.
    ///
    /// Some providers refuse verbatim transcription of copyrighted-looking
    /// pages; the anti-recitation variants ask for analysis instead.
    pub anti_recitation: bool,

    /// Model used for page analysis (planning). Default: "vision-router".
    pub router_model: String,

    /// Ordered fallback models tried when the router model fails.
    pub router_fallback: Vec<String>,

    /// Model used for extraction steps. Default: "vision-extract".
    pub extraction_model: String,

    /// `max_tokens` used for the single boosted retry after a token-limit
    /// failure. Default: 100 000.
    pub token_boost_value: u32,

    /// Keep the raw-text fallback section only while the other sections'
    /// combined content is shorter than this fraction of the raw text.
    /// Default: 0.5.
    pub raw_text_redundancy_ratio: f64,

    /// Thresholds for the missed-table heuristic.
    pub refinement: RefinementThresholds,
}

/// Empirically tuned thresholds for the table-likeness heuristic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementThresholds {
    /// Minimum characters in a section before it is considered at all.
    pub min_content_len: usize,
    /// Minimum non-empty lines before a block can look like a table.
    pub min_line_count: usize,
    /// Fraction of numeric characters above which a block looks tabular.
    pub numeric_density: f64,
    /// Per-line length dispersion (variance / mean) below which line lengths
    /// count as uniform.
    pub line_variance: f64,
    /// Fraction of lines with a multi-space or tab separator above which a
    /// block looks columnar.
    pub separator_ratio: f64,
}

impl Default for RefinementThresholds {
    fn default() -> Self {
        Self {
            min_content_len: 500,
            min_line_count: 5,
            numeric_density: 0.2,
            line_variance: 0.5,
            separator_ratio: 0.6,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            rate_limit_per_minute: 60,
            retry_max_attempts: 3,
            retry_backoff_base: 2.0,
            cache_enabled: true,
            cache_ttl_secs: 3600,
            fallback_to_raw_text: true,
            target_lang: "en".to_string(),
            iterative_refinement_enabled: false,
            anti_recitation: false,
            router_model: "vision-router".to_string(),
            router_fallback: Vec::new(),
            extraction_model: "vision-extract".to_string(),
            token_boost_value: 100_000,
            raw_text_redundancy_ratio: 0.5,
            refinement: RefinementThresholds::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn concurrency_limit(mut self, n: usize) -> Self {
        self.config.concurrency_limit = n.clamp(1, 20);
        self
    }

    pub fn rate_limit_per_minute(mut self, n: u32) -> Self {
        self.config.rate_limit_per_minute = n.max(1);
        self
    }

    pub fn retry_max_attempts(mut self, n: u32) -> Self {
        self.config.retry_max_attempts = n;
        self
    }

    pub fn retry_backoff_base(mut self, base: f64) -> Self {
        self.config.retry_backoff_base = base;
        self
    }

    pub fn cache_enabled(mut self, v: bool) -> Self {
        self.config.cache_enabled = v;
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.cache_ttl_secs = secs;
        self
    }

    pub fn fallback_to_raw_text(mut self, v: bool) -> Self {
        self.config.fallback_to_raw_text = v;
        self
    }

    pub fn target_lang(mut self, lang: impl Into<String>) -> Self {
        self.config.target_lang = lang.into();
        self
    }

    pub fn iterative_refinement(mut self, v: bool) -> Self {
        self.config.iterative_refinement_enabled = v;
        self
    }

    pub fn anti_recitation(mut self, v: bool) -> Self {
        self.config.anti_recitation = v;
        self
    }

    pub fn router_model(mut self, model: impl Into<String>) -> Self {
        self.config.router_model = model.into();
        self
    }

    pub fn router_fallback(mut self, models: Vec<String>) -> Self {
        self.config.router_fallback = models;
        self
    }

    pub fn extraction_model(mut self, model: impl Into<String>) -> Self {
        self.config.extraction_model = model.into();
        self
    }

    pub fn token_boost_value(mut self, tokens: u32) -> Self {
        self.config.token_boost_value = tokens;
        self
    }

    pub fn raw_text_redundancy_ratio(mut self, ratio: f64) -> Self {
        self.config.raw_text_redundancy_ratio = ratio;
        self
    }

    pub fn refinement(mut self, thresholds: RefinementThresholds) -> Self {
        self.config.refinement = thresholds;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ExtractError> {
        let c = &self.config;
        if c.concurrency_limit == 0 || c.concurrency_limit > 20 {
            return Err(ExtractError::InvalidConfig(format!(
                "concurrency_limit must be 1–20, got {}",
                c.concurrency_limit
            )));
        }
        if c.rate_limit_per_minute == 0 {
            return Err(ExtractError::InvalidConfig(
                "rate_limit_per_minute must be ≥ 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.raw_text_redundancy_ratio) {
            return Err(ExtractError::InvalidConfig(format!(
                "raw_text_redundancy_ratio must be within 0.0–1.0, got {}",
                c.raw_text_redundancy_ratio
            )));
        }
        // The dispersion heuristic computes a sample variance over line
        // lengths, which needs at least two lines.
        if c.refinement.min_line_count < 2 {
            return Err(ExtractError::InvalidConfig(format!(
                "refinement.min_line_count must be ≥ 2, got {}",
                c.refinement.min_line_count
            )));
        }
        if c.router_model.is_empty() || c.extraction_model.is_empty() {
            return Err(ExtractError::InvalidConfig(
                "router_model and extraction_model must be non-empty".into(),
            ));
        }
        Ok(self.config)
    }
}
