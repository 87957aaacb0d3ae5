//! Planner data model: extraction strategies, plan steps and page analysis.
//!
//! These types are deserialized from model JSON, which is only loosely under
//! our control. The deserializers are therefore defensive: unknown strategy
//! tags survive as [`Strategy::Custom`] (handled by the merger's generic
//! routine), and `max_tokens` is clamped into its hard bound rather than
//! trusted — a malformed plan must never smuggle an out-of-range budget into
//! an extraction step.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hard lower bound for a plan step's output token budget.
pub const MIN_STEP_TOKENS: u32 = 1_000;
/// Hard upper bound for a plan step's output token budget.
pub const MAX_STEP_TOKENS: u32 = 50_000;

/// Suffix marking a strategy tag as its anti-recitation variant.
pub const ANTI_RECITATION_SUFFIX: &str = "_anti_recitation";

/// A named extraction approach, determining prompt content and the expected
/// output shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Minimal,
    Basic,
    Comprehensive,
    TableFocus,
    TableChunk,
    TextOnly,
    VisualOnly,
    /// An unrecognized tag. Kept verbatim; the merger falls back to its
    /// generic routine and the prompt map to the minimal template.
    Custom(String),
}

impl Strategy {
    /// The canonical string tag (without any anti-recitation suffix).
    pub fn as_tag(&self) -> &str {
        match self {
            Strategy::Minimal => "minimal",
            Strategy::Basic => "basic",
            Strategy::Comprehensive => "comprehensive",
            Strategy::TableFocus => "table_focus",
            Strategy::TableChunk => "table_chunk",
            Strategy::TextOnly => "text_only",
            Strategy::VisualOnly => "visual_only",
            Strategy::Custom(tag) => tag,
        }
    }

    /// Parse a tag, stripping any anti-recitation suffix first.
    pub fn from_tag(tag: &str) -> Strategy {
        let base = tag.strip_suffix(ANTI_RECITATION_SUFFIX).unwrap_or(tag);
        match base {
            "minimal" => Strategy::Minimal,
            "basic" => Strategy::Basic,
            "comprehensive" => Strategy::Comprehensive,
            "table_focus" => Strategy::TableFocus,
            "table_chunk" => Strategy::TableChunk,
            "text_only" => Strategy::TextOnly,
            "visual_only" => Strategy::VisualOnly,
            other => Strategy::Custom(other.to_string()),
        }
    }

    /// The tag a step result carries, with the anti-recitation suffix when
    /// that prompt variant was used.
    pub fn result_tag(&self, anti_recitation: bool) -> String {
        if anti_recitation {
            format!("{}{}", self.as_tag(), ANTI_RECITATION_SUFFIX)
        } else {
            self.as_tag().to_string()
        }
    }
}

impl Serialize for Strategy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_tag())
    }
}

impl<'de> Deserialize<'de> for Strategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Strategy::from_tag(&tag))
    }
}

/// Clamp a deserialized token budget into the hard bound.
fn deserialize_max_tokens<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    // Models occasionally emit the budget as a float or a string.
    let raw = Value::deserialize(deserializer)?;
    let n = match &raw {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .unwrap_or(default_max_tokens() as u64);
    Ok((n.min(u32::MAX as u64) as u32).clamp(MIN_STEP_TOKENS, MAX_STEP_TOKENS))
}

fn default_max_tokens() -> u32 {
    10_000
}

fn default_complexity() -> String {
    "medium".to_string()
}

/// Split metadata for a table continuation step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkSpec {
    /// First data row (0-indexed) this chunk covers.
    #[serde(default)]
    pub start_row: u64,
    /// One past the last row, when the planner knows it.
    #[serde(default)]
    pub end_row: Option<u64>,
    /// Total rows of the logical table, when known.
    #[serde(default)]
    pub total_rows: Option<u64>,
}

/// One unit of work: a strategy plus a token budget for a page (or a
/// sub-region of it). Produced by the planner, consumed once by the
/// step executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default)]
    pub step: u32,
    pub strategy: Strategy,
    #[serde(default)]
    pub description: String,
    /// Output token budget, always within 1 000–50 000.
    #[serde(
        default = "default_max_tokens",
        deserialize_with = "deserialize_max_tokens"
    )]
    pub max_tokens: u32,
    #[serde(default)]
    pub special_instructions: Option<String>,
    /// Present on table-continuation steps.
    #[serde(default)]
    pub chunk_info: Option<ChunkSpec>,
    /// "low" / "medium" / "high"; scales the per-call timeout.
    #[serde(default = "default_complexity")]
    pub estimated_complexity: String,
}

impl PlanStep {
    /// A plain step with defaults for everything but strategy and budget.
    pub fn new(step: u32, strategy: Strategy, description: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            step,
            strategy,
            description: description.into(),
            max_tokens: max_tokens.clamp(MIN_STEP_TOKENS, MAX_STEP_TOKENS),
            special_instructions: None,
            chunk_info: None,
            estimated_complexity: default_complexity(),
        }
    }
}

/// The planner's verdict for one page: a complexity classification, a
/// content inventory and an ordered list of extraction steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAnalysis {
    #[serde(default = "unknown_complexity")]
    pub page_complexity: String,
    #[serde(default)]
    pub has_dense_table: bool,
    #[serde(default)]
    pub table_info: Option<Value>,
    #[serde(default)]
    pub text_sections: u32,
    #[serde(default)]
    pub visual_elements: u32,
    #[serde(default)]
    pub extraction_plans: Vec<PlanStep>,
    #[serde(default)]
    pub total_estimated_tokens: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

fn unknown_complexity() -> String {
    "unknown".to_string()
}

impl PageAnalysis {
    /// The deterministic plan used when the router fails completely: one
    /// comprehensive step with a generous budget, and a warning on record.
    pub fn fallback() -> Self {
        Self {
            page_complexity: unknown_complexity(),
            has_dense_table: false,
            table_info: None,
            text_sections: 0,
            visual_elements: 0,
            extraction_plans: vec![PlanStep::new(
                1,
                Strategy::Comprehensive,
                "Fallback: comprehensive extraction",
                20_000,
            )],
            total_estimated_tokens: 20_000,
            warnings: vec!["Router failed, using fallback plan.".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_round_trip_and_suffix_strip() {
        assert_eq!(Strategy::from_tag("table_focus"), Strategy::TableFocus);
        assert_eq!(
            Strategy::from_tag("comprehensive_anti_recitation"),
            Strategy::Comprehensive
        );
        assert_eq!(
            Strategy::from_tag("made_up"),
            Strategy::Custom("made_up".into())
        );
        assert_eq!(
            Strategy::TableChunk.result_tag(true),
            "table_chunk_anti_recitation"
        );
    }

    #[test]
    fn max_tokens_clamped_from_malformed_json() {
        let step: PlanStep = serde_json::from_value(serde_json::json!({
            "step": 1,
            "strategy": "minimal",
            "max_tokens": 2_000_000
        }))
        .unwrap();
        assert_eq!(step.max_tokens, MAX_STEP_TOKENS);

        let step: PlanStep = serde_json::from_value(serde_json::json!({
            "step": 2,
            "strategy": "basic",
            "max_tokens": 3
        }))
        .unwrap();
        assert_eq!(step.max_tokens, MIN_STEP_TOKENS);

        // Strings and floats are tolerated, then clamped.
        let step: PlanStep = serde_json::from_value(serde_json::json!({
            "step": 3,
            "strategy": "basic",
            "max_tokens": "80000"
        }))
        .unwrap();
        assert_eq!(step.max_tokens, MAX_STEP_TOKENS);

        // Garbage falls back to the default budget.
        let step: PlanStep = serde_json::from_value(serde_json::json!({
            "step": 4,
            "strategy": "basic",
            "max_tokens": [1, 2]
        }))
        .unwrap();
        assert_eq!(step.max_tokens, 10_000);
    }

    #[test]
    fn fallback_plan_shape() {
        let analysis = PageAnalysis::fallback();
        assert_eq!(analysis.extraction_plans.len(), 1);
        assert_eq!(analysis.extraction_plans[0].strategy, Strategy::Comprehensive);
        assert_eq!(analysis.extraction_plans[0].max_tokens, 20_000);
        assert!(!analysis.warnings.is_empty());
    }
}
