//! Output data model: step results and the canonical merged page record.

use crate::plan::ChunkSpec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The outcome of one executed plan step.
///
/// `success == false` implies `content == None`; the constructors enforce
/// it so no caller has to re-check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step: u32,
    /// Strategy tag, possibly carrying the `_anti_recitation` suffix.
    pub strategy: String,
    pub success: bool,
    pub content: Option<Value>,
    pub error: Option<String>,
    pub tokens_used: u64,
    pub time_elapsed_ms: u64,
    pub model_used: Option<String>,
}

impl StepResult {
    pub fn ok(
        step: u32,
        strategy: impl Into<String>,
        content: Value,
        tokens_used: u64,
        time_elapsed_ms: u64,
        model_used: impl Into<String>,
    ) -> Self {
        Self {
            step,
            strategy: strategy.into(),
            success: true,
            content: Some(content),
            error: None,
            tokens_used,
            time_elapsed_ms,
            model_used: Some(model_used.into()),
        }
    }

    pub fn failed(
        step: u32,
        strategy: impl Into<String>,
        error: impl Into<String>,
        time_elapsed_ms: u64,
    ) -> Self {
        Self {
            step,
            strategy: strategy.into(),
            success: false,
            content: None,
            error: Some(error.into()),
            tokens_used: 0,
            time_elapsed_ms,
            model_used: None,
        }
    }
}

/// A titled content block. Content may itself be a nested JSON tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub section_title: String,
    pub content: Value,
    /// Stable content hash, assigned by the refinement analyzer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_fallback: bool,
}

impl Section {
    pub fn new(title: impl Into<String>, content: Value) -> Self {
        Self {
            section_title: title.into(),
            content,
            section_id: None,
            extraction_method: None,
            is_fallback: false,
        }
    }

    /// Normalize an arbitrary model-produced object into a section.
    ///
    /// Objects with a title-like key keep their title; anything else becomes
    /// an untitled section wrapping the whole value.
    pub fn from_value(value: &Value) -> Section {
        if let Value::Object(map) = value {
            let title = map
                .get("section_title")
                .or_else(|| map.get("title"))
                .and_then(Value::as_str)
                .unwrap_or("Untitled Section")
                .to_string();
            let content = map
                .get("content")
                .cloned()
                .unwrap_or_else(|| value.clone());
            let mut section = Section::new(title, content);
            section.is_fallback = map
                .get("is_fallback")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            section.extraction_method = map
                .get("extraction_method")
                .and_then(Value::as_str)
                .map(str::to_string);
            section
        } else {
            Section::new("Untitled Section", value.clone())
        }
    }
}

/// One extracted table, possibly reassembled from chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Table {
    pub title: String,
    pub headers: Vec<Value>,
    pub rows: Vec<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Present only on unmerged chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_info: Option<ChunkSpec>,
}

/// Per-step diagnostics kept in the record metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDiagnostic {
    pub step: u32,
    pub strategy: String,
    pub success: bool,
    pub tokens_used: u64,
    pub time_elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A non-fatal error recorded while merging one step's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingError {
    pub step: u32,
    pub strategy: String,
    pub error: String,
}

/// Metadata bag attached to every page record. Never absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub page_number: u32,
    pub router_warnings: Vec<String>,
    pub total_tokens_used: u64,
    pub total_time_ms: u64,
    pub extraction_details: Vec<StepDiagnostic>,
    pub extraction_strategies_used: Vec<String>,
    pub processing_errors: Vec<ProcessingError>,
    pub uses_anti_recitation: bool,
    /// Set to "raw_pdf_text" when the raw-text fallback produced the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_fallback: Option<String>,
    pub merge_warnings: Vec<String>,
    /// Free-form metadata harvested from step outputs.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// The canonical, merged, deduplicated representation of one page.
///
/// The merger's fallback ladder guarantees `title` and `summary` are always
/// filled with *something*, even when every extraction step failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_complexity: String,
    pub extraction_method: String,
    pub total_steps: usize,
    pub successful_steps: usize,
    pub main_title: Option<String>,
    pub page_summary: Option<String>,
    pub key_sections: Vec<Section>,
    pub visual_elements: Vec<Value>,
    pub tables: Vec<Table>,
    pub metadata: RecordMetadata,
}

/// The refinement analyzer's verdict: whether a second, focused pass should
/// replace a section that is likely a missed table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinementDecision {
    pub should_refine: bool,
    pub target_section_id: Option<String>,
    pub strategy: &'static str,
}

impl RefinementDecision {
    pub fn skip() -> Self {
        Self {
            should_refine: false,
            target_section_id: None,
            strategy: "table_focus",
        }
    }

    pub fn refine(target_section_id: String) -> Self {
        Self {
            should_refine: true,
            target_section_id: Some(target_section_id),
            strategy: "table_focus",
        }
    }
}
