//! Prompt templates for page analysis and extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the strategy → template contract lives in
//!    exactly one place, and [`extraction_prompt`] is total: every strategy
//!    tag (including unrecognized ones) resolves to a non-empty prompt.
//!
//! 2. **Testability** — unit tests inspect prompts directly without a live
//!    model, so a template regression never needs an API key to catch.

use crate::plan::Strategy;

/// System message for the router's analysis call.
pub const ROUTER_SYSTEM: &str =
    "You are an expert document analyzer. Provide detailed extraction plans. Return ONLY valid JSON.";

/// System message for extraction calls.
pub const EXTRACTOR_SYSTEM: &str =
    "You are a precise document analyzer. Return only valid JSON.";

/// The master prompt asking the model to assess a page and plan extraction.
pub const ROUTER_ANALYSIS_PROMPT: &str = r#"You are an expert document analyzer planning optimal extraction strategies.

Examine the attached page and return a JSON object with this shape:
{
  "page_complexity": "simple" | "moderate" | "complex",
  "content_analysis": {
    "has_dense_table": bool,
    "table_info": {"count": int, "approx_rows": int} | null,
    "text_sections": int,
    "visual_elements": int
  },
  "extraction_plans": [
    {
      "step": int,
      "strategy": "minimal" | "basic" | "comprehensive" | "table_focus" | "table_chunk" | "text_only" | "visual_only",
      "description": str,
      "max_tokens": int,
      "special_instructions": str | null,
      "chunk_info": {"start_row": int, "end_row": int} | null,
      "estimated_complexity": "low" | "medium" | "high"
    }
  ],
  "total_estimated_tokens": int,
  "warnings": [str]
}

Split very large tables across multiple table_chunk steps with non-overlapping
row ranges. Keep max_tokens between 1000 and 50000 per step. Return ONLY the
JSON object."#;

const MINIMAL_PROMPT: &str = r#"Extract the essentials of this page as JSON:
{"main_title": str, "page_summary": str, "key_points": [str]}
Return ONLY the JSON object."#;

const BASIC_PROMPT: &str = r#"Extract the structure of this page as JSON:
{"main_title": str, "page_summary": str,
 "key_sections": [{"section_title": str, "content": str}],
 "important_data": str | null}
Return ONLY the JSON object."#;

const COMPREHENSIVE_PROMPT: &str = r#"Extract everything on this page as JSON:
{"main_title": str, "page_summary": str,
 "key_sections": [{"section_title": str, "content": str}],
 "visual_elements": [{"type": str, "description": str}],
 "metadata": {...}}
Preserve reading order. Transcribe text faithfully. Return ONLY the JSON object."#;

const TABLE_FOCUS_PROMPT: &str = r#"Extract the table on this page as JSON:
{"table_title": str, "headers": [str], "rows": [[str]], "table_metadata": {...}}
Transcribe every cell exactly, including empty cells as "". Return ONLY the JSON object."#;

const TABLE_CHUNK_PROMPT: &str = r#"Extract ONLY the assigned row range of the table as JSON:
{"table_title": str, "headers": [str], "rows": [[str]],
 "chunk_info": {"start_row": int, "end_row": int}}
Use the same table_title for every chunk of the same table. Return ONLY the JSON object."#;

const TEXT_ONLY_PROMPT: &str = r#"Extract all running text from this page as JSON:
{"main_title": str, "page_summary": str, "text_content": str}
Ignore tables and figures. Return ONLY the JSON object."#;

const VISUAL_ONLY_PROMPT: &str = r#"Describe the visual elements of this page as JSON:
{"visual_elements": [{"type": str, "description": str, "data_summary": str}]}
Return ONLY the JSON object."#;

// Anti-recitation variants ask for analysis instead of verbatim
// transcription, for providers that refuse to reproduce page content.

const MINIMAL_AR_PROMPT: &str = r#"Analyze this page in your own words as JSON:
{"main_topic": str, "page_analysis": str, "key_points": [str]}
Do not transcribe verbatim; describe and summarize. Return ONLY the JSON object."#;

const COMPREHENSIVE_AR_PROMPT: &str = r#"Analyze this page in your own words as JSON:
{"main_topic": str, "page_analysis": str, "key_insights": [str], "data_summary": str}
Do not transcribe verbatim; describe and summarize. Return ONLY the JSON object."#;

const TABLE_AR_PROMPT: &str = r#"Describe the table on this page in your own words as JSON:
{"table_description": str, "data_patterns": str, "key_values": str, "notable_values": str}
Do not transcribe cells verbatim. Return ONLY the JSON object."#;

/// Build the extraction prompt for one plan step.
///
/// Total over all strategy tags: an unrecognized strategy gets the minimal
/// template. The language instruction is always injected first so the model
/// answers in the target language regardless of the page's language.
pub fn extraction_prompt(
    strategy: &Strategy,
    special_instructions: Option<&str>,
    target_lang: &str,
    anti_recitation: bool,
) -> String {
    let base = if anti_recitation {
        match strategy {
            Strategy::Comprehensive => COMPREHENSIVE_AR_PROMPT,
            Strategy::TableFocus | Strategy::TableChunk => TABLE_AR_PROMPT,
            _ => MINIMAL_AR_PROMPT,
        }
    } else {
        match strategy {
            Strategy::Minimal => MINIMAL_PROMPT,
            Strategy::Basic => BASIC_PROMPT,
            Strategy::Comprehensive => COMPREHENSIVE_PROMPT,
            Strategy::TableFocus => TABLE_FOCUS_PROMPT,
            Strategy::TableChunk => TABLE_CHUNK_PROMPT,
            Strategy::TextOnly => TEXT_ONLY_PROMPT,
            Strategy::VisualOnly => VISUAL_ONLY_PROMPT,
            Strategy::Custom(_) => MINIMAL_PROMPT,
        }
    };

    let mut prompt = format!(
        "IMPORTANT: Write all extracted titles, summaries and descriptions in {} language.\n{}",
        target_lang, base
    );
    if let Some(instructions) = special_instructions {
        if !instructions.is_empty() {
            prompt.push_str("\n\nSpecial instructions for this step:\n");
            prompt.push_str(instructions);
        }
    }
    prompt
}

/// Build the router prompt with a bounded preview of the page text.
///
/// The preview is truncated to `max_preview` characters with an ellipsis
/// marker so a text-heavy page cannot blow up the request size.
pub fn router_prompt(page_text: Option<&str>, target_lang: &str, max_preview: usize) -> String {
    let mut prompt = format!(
        "IMPORTANT: Write all your analysis, descriptions, and insights in {} language.\n{}",
        target_lang, ROUTER_ANALYSIS_PROMPT
    );
    if let Some(text) = page_text {
        if !text.is_empty() {
            let preview: String = if text.chars().count() > max_preview {
                let truncated: String = text.chars().take(max_preview).collect();
                format!("{}...", truncated)
            } else {
                text.to_string()
            };
            prompt.push_str("\n\nText preview from page:\n");
            prompt.push_str(&preview);
        }
    }
    prompt
}
