//! Merge step results into one canonical page record.
//!
//! Steps come back as loosely shaped JSON, in arbitrary key spellings, with
//! overlapping content and occasional garbage. The merger turns that pile
//! into exactly one [`PageRecord`] per page:
//!
//! 1. seed the record with analysis metadata and step diagnostics,
//! 2. fold each successful step in through a per-strategy routine,
//! 3. reassemble chunked tables,
//! 4. walk the fallback ladder when nothing substantive was extracted,
//! 5. deduplicate sections and visuals by content fingerprint, pruning the
//!    raw-text fallback once real content makes it redundant.
//!
//! Merging is deterministic and pure: same inputs, same record. It never
//! performs I/O and never fails — a malformed step output is recorded as a
//! processing error on the record, not raised.

use crate::config::PipelineConfig;
use crate::jsonscan::{self, MAX_SEARCH_DEPTH};
use crate::plan::{ChunkSpec, PageAnalysis, Strategy, ANTI_RECITATION_SUFFIX};
use crate::record::{
    PageRecord, ProcessingError, RecordMetadata, Section, StepDiagnostic, StepResult, Table,
};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

// Candidate key spellings, in order of preference.
const TITLE_KEYS: &[&str] = &["main_title", "title", "document_title", "page_title", "main_topic"];
const SUMMARY_KEYS: &[&str] = &["page_summary", "summary", "description", "abstract", "page_analysis"];
const TEXT_KEYS: &[&str] = &["text_content", "content", "body", "text", "key_points"];
const SECTION_KEYS: &[&str] = &["key_sections", "sections", "text_sections", "key_themes"];
const VISUAL_KEYS: &[&str] = &["visual_elements", "visuals", "figures", "charts", "visual_summary"];

/// Extraction method stamped on every routed record.
const SMART_ROUTING: &str = "smart_routing";
/// Marker value for the raw-text fallback, also stored in the metadata.
const RAW_PDF_TEXT: &str = "raw_pdf_text";
/// Characters of a fallback title taken from the first raw line.
const FALLBACK_TITLE_CHARS: usize = 200;
/// Characters of harvested text used for a fallback summary.
const FALLBACK_SUMMARY_CHARS: usize = 500;
/// Minimum string length for a generic object value to count as a section.
const GENERIC_SECTION_MIN_CHARS: usize = 50;

/// The merger: deterministic consolidation of step results.
pub struct Merger {
    raw_text_redundancy_ratio: f64,
}

impl Merger {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            raw_text_redundancy_ratio: config.raw_text_redundancy_ratio,
        }
    }

    /// Merge all of one page's step results into its canonical record.
    ///
    /// `raw_text` is the page's plain extracted text, offered as the last
    /// fallback rung; pass `None` to disable that rung.
    pub fn merge(
        &self,
        results: &[StepResult],
        analysis: &PageAnalysis,
        raw_text: Option<&str>,
        page_number: u32,
    ) -> PageRecord {
        let mut record = seed_record(results, analysis, page_number);

        for result in results {
            let content = match (&result.success, &result.content) {
                (true, Some(content)) => normalize_content(content),
                _ => continue,
            };
            if let Err(error) = fold_step(&mut record, &result.strategy, &content) {
                warn!(
                    page = page_number,
                    step = result.step,
                    strategy = %result.strategy,
                    error = %error,
                    "step content could not be merged cleanly"
                );
                record.metadata.processing_errors.push(ProcessingError {
                    step: result.step,
                    strategy: result.strategy.clone(),
                    error,
                });
            }
        }

        record.tables = merge_table_chunks(std::mem::take(&mut record.tables));
        self.apply_fallback_ladder(&mut record, results, analysis, raw_text);
        self.dedup(&mut record, raw_text);

        debug!(
            page = page_number,
            sections = record.key_sections.len(),
            tables = record.tables.len(),
            "page record merged"
        );
        record
    }

    /// Fold a refinement step's tables into an existing record.
    ///
    /// A failed refinement, or one that produced no tables, leaves the record
    /// unchanged. Otherwise the refined tables are appended and the section
    /// the analyzer targeted is dropped as superseded.
    pub fn merge_refined(
        &self,
        mut record: PageRecord,
        refined: &StepResult,
        target_section_id: &str,
    ) -> PageRecord {
        let content = match (&refined.success, &refined.content) {
            (true, Some(content)) => normalize_content(content),
            _ => return record,
        };

        let mut tables = Vec::new();
        match content.get("tables").and_then(Value::as_array) {
            Some(items) => {
                for item in items {
                    if let Some(table) = table_from_value(item) {
                        tables.push(table);
                    }
                }
            }
            None => {
                if let Some(table) = table_from_value(&content) {
                    tables.push(table);
                }
            }
        }
        if tables.is_empty() {
            return record;
        }

        record
            .key_sections
            .retain(|s| s.section_id.as_deref() != Some(target_section_id));
        record.tables.extend(tables);
        record.total_steps += 1;
        record.successful_steps += 1;
        record.metadata.total_tokens_used += refined.tokens_used;
        record.metadata.total_time_ms += refined.time_elapsed_ms;
        record.metadata.extraction_details.push(StepDiagnostic {
            step: refined.step,
            strategy: refined.strategy.clone(),
            success: true,
            tokens_used: refined.tokens_used,
            time_elapsed_ms: refined.time_elapsed_ms,
            error: None,
        });
        record
    }

    /// Rung 1: harvested text from whatever the steps did return.
    /// Rung 2: the page's raw text, flagged as a fallback.
    /// Rung 3: a minimal failure record.
    fn apply_fallback_ladder(
        &self,
        record: &mut PageRecord,
        results: &[StepResult],
        analysis: &PageAnalysis,
        raw_text: Option<&str>,
    ) {
        if has_substantive_content(record) {
            return;
        }

        let harvested = results
            .iter()
            .filter_map(|r| r.content.as_ref())
            .map(|c| jsonscan::harvest_text(c, MAX_SEARCH_DEPTH))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !harvested.is_empty() {
            if record.main_title.is_none() {
                let first_line = harvested
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .unwrap_or("Page Content");
                record.main_title = Some(truncate_chars(first_line, FALLBACK_TITLE_CHARS));
            }
            if record.page_summary.is_none() {
                record.page_summary = Some(ellipsize(&harvested, FALLBACK_SUMMARY_CHARS));
            }
            record
                .key_sections
                .push(Section::new("Extracted Content", Value::String(harvested)));
            return;
        }

        match raw_text.filter(|t| !t.trim().is_empty()) {
            Some(raw) => {
                let first_line = raw
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .unwrap_or("Page Content");
                record.main_title = Some(truncate_chars(first_line, FALLBACK_TITLE_CHARS));
                record.page_summary =
                    Some(format!("Raw text extraction ({} characters)", raw.chars().count()));

                let mut section =
                    Section::new("Raw PDF Content (Fallback)", Value::String(raw.to_string()));
                section.extraction_method = Some(RAW_PDF_TEXT.to_string());
                section.is_fallback = true;
                record.key_sections.push(section);

                record.metadata.extraction_fallback = Some(RAW_PDF_TEXT.to_string());
                record
                    .metadata
                    .merge_warnings
                    .push("All extraction methods failed, using raw PDF text".to_string());
            }
            None => {
                record.main_title =
                    Some(format!("Page (Complexity: {})", analysis.page_complexity));
                record.page_summary = Some("Page extraction failed completely".to_string());
                record
                    .metadata
                    .merge_warnings
                    .push("No content could be extracted".to_string());
            }
        }
    }

    /// Deduplicate sections and visuals by content fingerprint.
    ///
    /// The raw-text fallback section is treated separately: it survives only
    /// while the real sections' combined content is shorter than the
    /// configured fraction of the raw text. Re-merging an already merged
    /// record is a no-op.
    fn dedup(&self, record: &mut PageRecord, raw_text: Option<&str>) {
        let mut seen = std::collections::HashSet::new();
        let mut kept: Vec<Section> = Vec::with_capacity(record.key_sections.len());
        let mut fallback: Option<Section> = None;

        for section in record.key_sections.drain(..) {
            if section.is_fallback && fallback.is_none() {
                fallback = Some(section);
                continue;
            }
            if seen.insert(jsonscan::fingerprint(&section)) {
                kept.push(section);
            }
        }

        if let (Some(fallback_section), Some(raw)) = (fallback, raw_text) {
            let extracted_len: usize = kept.iter().map(|s| content_len(&s.content)).sum();
            let threshold = (raw.chars().count() as f64) * self.raw_text_redundancy_ratio;
            if (extracted_len as f64) < threshold {
                kept.push(fallback_section);
            } else {
                record.metadata.extraction_fallback = None;
                record
                    .metadata
                    .merge_warnings
                    .push("Raw text fallback dropped as redundant".to_string());
            }
        }
        record.key_sections = kept;

        let mut seen_visuals = std::collections::HashSet::new();
        record
            .visual_elements
            .retain(|v| seen_visuals.insert(jsonscan::fingerprint(v)));
    }
}

/// Initial record: complexity, step diagnostics and token accounting, no
/// content yet.
fn seed_record(results: &[StepResult], analysis: &PageAnalysis, page_number: u32) -> PageRecord {
    let successful: Vec<&StepResult> = results.iter().filter(|r| r.success).collect();

    let mut strategies_used: Vec<String> = Vec::new();
    for result in &successful {
        if !strategies_used.contains(&result.strategy) {
            strategies_used.push(result.strategy.clone());
        }
    }
    let uses_anti_recitation = strategies_used
        .iter()
        .any(|s| s.ends_with(ANTI_RECITATION_SUFFIX));

    PageRecord {
        page_complexity: analysis.page_complexity.clone(),
        extraction_method: SMART_ROUTING.to_string(),
        total_steps: results.len(),
        successful_steps: successful.len(),
        main_title: None,
        page_summary: None,
        key_sections: Vec::new(),
        visual_elements: Vec::new(),
        tables: Vec::new(),
        metadata: RecordMetadata {
            page_number,
            router_warnings: analysis.warnings.clone(),
            total_tokens_used: results.iter().map(|r| r.tokens_used).sum(),
            total_time_ms: results.iter().map(|r| r.time_elapsed_ms).sum(),
            extraction_details: results
                .iter()
                .map(|r| StepDiagnostic {
                    step: r.step,
                    strategy: r.strategy.clone(),
                    success: r.success,
                    tokens_used: r.tokens_used,
                    time_elapsed_ms: r.time_elapsed_ms,
                    error: r.error.clone(),
                })
                .collect(),
            extraction_strategies_used: strategies_used,
            processing_errors: Vec::new(),
            uses_anti_recitation,
            extraction_fallback: None,
            merge_warnings: Vec::new(),
            extra: Map::new(),
        },
    }
}

/// Normalize arbitrary step content into a JSON object.
fn normalize_content(content: &Value) -> Value {
    match content {
        Value::Object(_) => content.clone(),
        Value::Array(items) if items.len() == 1 => normalize_content(&items[0]),
        Value::String(s) => jsonscan::parse_first_object(s)
            .unwrap_or_else(|| json!({ "text_content": s })),
        other => json!({ "raw_content": other.to_string() }),
    }
}

/// Dispatch one step's normalized content to its per-strategy routine.
fn fold_step(record: &mut PageRecord, strategy_tag: &str, content: &Value) -> Result<(), String> {
    match Strategy::from_tag(strategy_tag) {
        Strategy::Minimal | Strategy::TextOnly => fold_minimal(record, content),
        Strategy::Basic => fold_basic(record, content),
        Strategy::Comprehensive => fold_comprehensive(record, content),
        Strategy::TableFocus | Strategy::TableChunk => fold_table(record, content),
        Strategy::VisualOnly => {
            fold_visuals(record, content);
            Ok(())
        }
        Strategy::Custom(_) => fold_generic(record, content),
    }
}

fn fold_minimal(record: &mut PageRecord, content: &Value) -> Result<(), String> {
    fold_title_and_summary(record, content);
    if let Some(text) = jsonscan::find_key(content, TEXT_KEYS, MAX_SEARCH_DEPTH) {
        match text {
            Value::String(s) if !s.trim().is_empty() => {
                record.key_sections.push(Section::new("Content", text.clone()));
            }
            Value::Array(_) => {
                record.key_sections.push(Section::new("Content", text.clone()));
            }
            _ => {}
        }
    }
    Ok(())
}

fn fold_basic(record: &mut PageRecord, content: &Value) -> Result<(), String> {
    fold_title_and_summary(record, content);
    fold_sections(record, content);
    if let Some(data) = content.get("important_data").filter(|v| !v.is_null()) {
        record
            .key_sections
            .push(Section::new("Important Data", data.clone()));
    }
    Ok(())
}

fn fold_comprehensive(record: &mut PageRecord, content: &Value) -> Result<(), String> {
    fold_title_and_summary(record, content);
    fold_sections(record, content);
    fold_visuals(record, content);

    // Free-form metadata from the step output, first writer wins per key.
    if let Some(Value::Object(meta)) = content.get("metadata") {
        for (key, value) in meta {
            record
                .metadata
                .extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    // Anti-recitation outputs analyze rather than transcribe.
    if let Some(Value::Array(insights)) = content.get("key_insights") {
        for insight in insights {
            record
                .key_sections
                .push(Section::new("Key Insight", insight.clone()));
        }
    }
    if let Some(summary) = content.get("data_summary").and_then(Value::as_str) {
        if !summary.trim().is_empty() {
            record
                .key_sections
                .push(Section::new("Data Summary", Value::String(summary.to_string())));
        }
    }
    Ok(())
}

fn fold_table(record: &mut PageRecord, content: &Value) -> Result<(), String> {
    let headers = content.get("headers").cloned();
    let rows = content.get("rows").cloned();

    if headers.is_some() || rows.is_some() {
        let headers = match headers {
            Some(Value::Array(items)) => items,
            Some(_) => return Err("table headers are not an array".to_string()),
            None => Vec::new(),
        };
        let rows = match rows {
            Some(Value::Array(items)) => items,
            Some(_) => return Err("table rows are not an array".to_string()),
            None => Vec::new(),
        };
        let chunk_info = match content.get("chunk_info") {
            Some(raw) if !raw.is_null() => Some(
                serde_json::from_value::<ChunkSpec>(raw.clone())
                    .map_err(|e| format!("undecodable chunk_info: {e}"))?,
            ),
            _ => None,
        };
        record.tables.push(Table {
            title: content
                .get("table_title")
                .or_else(|| content.get("title"))
                .and_then(Value::as_str)
                .unwrap_or("Untitled Table")
                .to_string(),
            headers,
            rows,
            metadata: match content.get("table_metadata") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            },
            chunk_info,
        });
        return Ok(());
    }

    // Anti-recitation table output: a description instead of cells.
    if content.get("table_description").is_some() || content.get("data_patterns").is_some() {
        let analysis = json!({
            "description": content.get("table_description").cloned().unwrap_or(Value::Null),
            "patterns": content.get("data_patterns").cloned().unwrap_or(Value::Null),
            "key_values": content.get("key_values").cloned().unwrap_or(Value::Null),
            "notable_values": content.get("notable_values").cloned().unwrap_or(Value::Null),
        });
        record
            .key_sections
            .push(Section::new("Table Analysis", analysis));
        return Ok(());
    }

    Err("table step produced neither cells nor a description".to_string())
}

fn fold_generic(record: &mut PageRecord, content: &Value) -> Result<(), String> {
    fold_title_and_summary(record, content);
    let map = match content.as_object() {
        Some(map) => map,
        None => return Ok(()),
    };

    for (key, value) in map {
        if key == "metadata" || key == "extraction_details" {
            continue;
        }
        match value {
            Value::String(s) if s.chars().count() > GENERIC_SECTION_MIN_CHARS => {
                record
                    .key_sections
                    .push(Section::new(title_case(key), value.clone()));
            }
            Value::Array(items) => {
                let titled = items.first().and_then(Value::as_object).map(|first| {
                    first.contains_key("section_title") || first.contains_key("title")
                });
                if titled == Some(true) {
                    record
                        .key_sections
                        .extend(items.iter().map(Section::from_value));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn fold_title_and_summary(record: &mut PageRecord, content: &Value) {
    if record.main_title.is_none() {
        if let Some(title) = jsonscan::find_key(content, TITLE_KEYS, MAX_SEARCH_DEPTH)
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
        {
            record.main_title = Some(title.to_string());
        }
    }
    if record.page_summary.is_none() {
        if let Some(summary) = jsonscan::find_key(content, SUMMARY_KEYS, MAX_SEARCH_DEPTH)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
        {
            record.page_summary = Some(summary.to_string());
        }
    }
}

fn fold_sections(record: &mut PageRecord, content: &Value) {
    if let Some(Value::Array(items)) = jsonscan::find_key(content, SECTION_KEYS, MAX_SEARCH_DEPTH) {
        record
            .key_sections
            .extend(items.iter().map(Section::from_value));
    }
}

fn fold_visuals(record: &mut PageRecord, content: &Value) {
    match jsonscan::find_key(content, VISUAL_KEYS, MAX_SEARCH_DEPTH) {
        Some(Value::Array(items)) => record.visual_elements.extend(items.iter().cloned()),
        Some(Value::String(s)) if !s.trim().is_empty() => record
            .visual_elements
            .push(json!({ "description": s })),
        _ => {}
    }
}

/// Reassemble chunked tables: group by title, order chunks by start row,
/// concatenate rows. Unchunked tables pass through untouched, after the
/// merged ones.
fn merge_table_chunks(tables: Vec<Table>) -> Vec<Table> {
    let mut groups: Vec<(String, Vec<Table>)> = Vec::new();
    let mut standalone = Vec::new();

    for table in tables {
        if table.chunk_info.is_some() {
            match groups.iter_mut().find(|(title, _)| *title == table.title) {
                Some((_, members)) => members.push(table),
                None => groups.push((table.title.clone(), vec![table])),
            }
        } else {
            standalone.push(table);
        }
    }

    let mut merged = Vec::with_capacity(groups.len() + standalone.len());
    for (title, mut chunks) in groups {
        chunks.sort_by_key(|t| t.chunk_info.as_ref().map(|c| c.start_row).unwrap_or(0));
        let headers = chunks[0].headers.clone();
        let rows: Vec<Value> = chunks.iter().flat_map(|c| c.rows.iter().cloned()).collect();

        let mut metadata = Map::new();
        metadata.insert("merged_from_chunks".to_string(), json!(chunks.len()));
        metadata.insert("total_rows".to_string(), json!(rows.len()));

        merged.push(Table {
            title,
            headers,
            rows,
            metadata,
            chunk_info: None,
        });
    }
    merged.extend(standalone);
    merged
}

/// Parse a loosely shaped table object; `None` when it has no cells.
fn table_from_value(value: &Value) -> Option<Table> {
    let headers = value.get("headers").and_then(Value::as_array);
    let rows = value.get("rows").and_then(Value::as_array);
    if headers.is_none() && rows.is_none() {
        return None;
    }
    Some(Table {
        title: value
            .get("table_title")
            .or_else(|| value.get("title"))
            .and_then(Value::as_str)
            .unwrap_or("Untitled Table")
            .to_string(),
        headers: headers.cloned().unwrap_or_default(),
        rows: rows.cloned().unwrap_or_default(),
        metadata: match value.get("table_metadata") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        },
        chunk_info: value
            .get("chunk_info")
            .and_then(|raw| serde_json::from_value(raw.clone()).ok()),
    })
}

fn has_substantive_content(record: &PageRecord) -> bool {
    !record.key_sections.is_empty()
        || !record.tables.is_empty()
        || !record.visual_elements.is_empty()
        || record.main_title.is_some()
        || record.page_summary.is_some()
}

fn content_len(content: &Value) -> usize {
    match content {
        Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn ellipsize(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", truncate_chars(text, max))
    } else {
        text.to_string()
    }
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
