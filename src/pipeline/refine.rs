//! Self-correction: spot prose sections that are probably mangled tables.
//!
//! A table flattened into running text has a signature: many short lines of
//! near-uniform length, dense with digits or padded with column separators.
//! The analyzer scores every section of a merged record against that
//! signature and, on the first hit, asks for one focused re-extraction of
//! that section. It is a pure heuristic pass over strings already in memory;
//! no model is consulted.

use crate::config::RefinementThresholds;
use crate::jsonscan;
use crate::record::{PageRecord, RefinementDecision, Section};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Two-plus spaces or a tab: the usual residue of flattened columns.
static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"( {2,}|\t)").expect("valid regex"));

/// The missed-table detector.
pub struct RefinementAnalyzer {
    thresholds: RefinementThresholds,
}

impl RefinementAnalyzer {
    pub fn new(thresholds: RefinementThresholds) -> Self {
        Self { thresholds }
    }

    /// Scan a record's sections for table-like prose.
    ///
    /// Assigns every section its content fingerprint as `section_id` (always
    /// recomputed, so a changed section gets a changed id), then returns a
    /// refinement decision targeting the first table-like section, or a skip.
    pub fn analyze_for_missed_tables(&self, record: &mut PageRecord) -> RefinementDecision {
        let mut target: Option<String> = None;

        for section in &mut record.key_sections {
            let id = section_fingerprint(section);
            section.section_id = Some(id.clone());

            if target.is_none() {
                if let Some(text) = section.content.as_str() {
                    if self.is_likely_table(text) {
                        debug!(
                            section = %section.section_title,
                            "section looks like a flattened table"
                        );
                        target = Some(id);
                    }
                }
            }
        }

        match target {
            Some(id) => RefinementDecision::refine(id),
            None => RefinementDecision::skip(),
        }
    }

    /// The table-likeness heuristic.
    ///
    /// Requires enough text and enough lines, then: line lengths must be
    /// uniform (dispersion below the threshold) AND the text must be either
    /// digit-dense or separator-padded.
    fn is_likely_table(&self, text: &str) -> bool {
        let t = &self.thresholds;
        if text.chars().count() < t.min_content_len {
            return false;
        }

        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        // The sample variance below needs at least two lines, whatever the
        // configured minimum says.
        if lines.len() < t.min_line_count.max(2) {
            return false;
        }

        let total_chars = text.chars().count();
        let digit_chars = text.chars().filter(char::is_ascii_digit).count();
        let numeric_density = digit_chars as f64 / total_chars as f64;

        let lengths: Vec<f64> = lines.iter().map(|l| l.chars().count() as f64).collect();
        let mean = lengths.iter().sum::<f64>() / lengths.len() as f64;
        if mean == 0.0 {
            return false;
        }
        // Sample variance over the line lengths, normalized by the mean so
        // the threshold is scale-free.
        let variance = lengths.iter().map(|l| (l - mean).powi(2)).sum::<f64>()
            / (lengths.len() - 1) as f64;
        let dispersion = variance / mean;

        let separator_lines = lines.iter().filter(|l| SEPARATOR_RE.is_match(l)).count();
        let separator_ratio = separator_lines as f64 / lines.len() as f64;

        dispersion < t.line_variance
            && (numeric_density > t.numeric_density || separator_ratio > t.separator_ratio)
    }
}

/// Fingerprint of a section's content, independent of any previously
/// assigned id.
fn section_fingerprint(section: &Section) -> String {
    let mut canonical = section.clone();
    canonical.section_id = None;
    jsonscan::fingerprint(&canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordMetadata, Section};
    use serde_json::json;

    fn analyzer() -> RefinementAnalyzer {
        RefinementAnalyzer::new(RefinementThresholds::default())
    }

    fn record_with(sections: Vec<Section>) -> PageRecord {
        PageRecord {
            page_complexity: "moderate".to_string(),
            extraction_method: "smart_routing".to_string(),
            total_steps: 1,
            successful_steps: 1,
            main_title: Some("T".to_string()),
            page_summary: None,
            key_sections: sections,
            visual_elements: Vec::new(),
            tables: Vec::new(),
            metadata: RecordMetadata::default(),
        }
    }

    /// Uniform digit-dense rows, like a table flattened to text.
    fn tabular_text() -> String {
        (0..20)
            .map(|i| format!("2024-01-{:02}  item-{:03}  {}.00  {}", i + 1, i, i * 10, i * 7))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Ordinary prose: long and line-length-uneven.
    fn prose_text() -> String {
        let mut lines = Vec::new();
        for i in 0..12 {
            lines.push("The quick brown fox jumps over the lazy dog and keeps going.".repeat(i % 4 + 1));
        }
        lines.join("\n")
    }

    #[test]
    fn tabular_section_triggers_refinement() {
        let mut record = record_with(vec![Section::new("Data", json!(tabular_text()))]);
        let decision = analyzer().analyze_for_missed_tables(&mut record);
        assert!(decision.should_refine);
        assert_eq!(decision.strategy, "table_focus");
        assert_eq!(
            decision.target_section_id,
            record.key_sections[0].section_id
        );
    }

    #[test]
    fn prose_section_is_left_alone() {
        let mut record = record_with(vec![Section::new("Intro", json!(prose_text()))]);
        let decision = analyzer().analyze_for_missed_tables(&mut record);
        assert!(!decision.should_refine);
        // Ids are assigned even when nothing needs refining.
        assert!(record.key_sections[0].section_id.is_some());
    }

    #[test]
    fn short_content_never_triggers() {
        let mut record = record_with(vec![Section::new("Tiny", json!("1  2\n3  4\n5  6\n7  8\n9  0"))]);
        let decision = analyzer().analyze_for_missed_tables(&mut record);
        assert!(!decision.should_refine);
    }

    #[test]
    fn few_lines_never_trigger() {
        let long_single_line = format!("{}  {}", "9".repeat(300), "8".repeat(300));
        let mut record = record_with(vec![Section::new("Wide", json!(long_single_line))]);
        let decision = analyzer().analyze_for_missed_tables(&mut record);
        assert!(!decision.should_refine);
    }

    #[test]
    fn uniform_but_neither_numeric_nor_separated_does_not_trigger() {
        // Uniform line lengths, no digits, single spaces only.
        let text = vec!["alpha beta gamma delta epsilon zeta"; 20].join("\n");
        let mut record = record_with(vec![Section::new("List", json!(text))]);
        let decision = analyzer().analyze_for_missed_tables(&mut record);
        assert!(!decision.should_refine);
    }

    #[test]
    fn separator_padded_uniform_lines_trigger_without_digits() {
        let text = vec!["alpha  beta  gamma  delta  epsilon  zeta  eta"; 20].join("\n");
        let mut record = record_with(vec![Section::new("Cols", json!(text))]);
        let decision = analyzer().analyze_for_missed_tables(&mut record);
        assert!(decision.should_refine);
    }

    #[test]
    fn first_tabular_section_wins() {
        let mut record = record_with(vec![
            Section::new("Prose", json!(prose_text())),
            Section::new("Table A", json!(tabular_text())),
            Section::new("Table B", json!(tabular_text() + " extra")),
        ]);
        let decision = analyzer().analyze_for_missed_tables(&mut record);
        assert_eq!(
            decision.target_section_id,
            record.key_sections[1].section_id
        );
    }

    #[test]
    fn fallback_sections_are_analyzed_like_any_other() {
        // Raw-text fallback is exactly where a table is most likely to be
        // hiding as flattened prose.
        let mut fallback = Section::new("Raw PDF Content (Fallback)", json!(tabular_text()));
        fallback.is_fallback = true;
        let mut record = record_with(vec![fallback]);
        let decision = analyzer().analyze_for_missed_tables(&mut record);
        assert!(decision.should_refine);
        assert_eq!(
            decision.target_section_id,
            record.key_sections[0].section_id
        );
    }

    #[test]
    fn non_string_content_is_skipped() {
        let mut record = record_with(vec![Section::new("Obj", json!({"k": "v"}))]);
        let decision = analyzer().analyze_for_missed_tables(&mut record);
        assert!(!decision.should_refine);
    }

    #[test]
    fn fingerprints_change_with_content() {
        let mut record = record_with(vec![Section::new("S", json!(tabular_text()))]);
        analyzer().analyze_for_missed_tables(&mut record);
        let first = record.key_sections[0].section_id.clone();

        record.key_sections[0].content = json!("different");
        analyzer().analyze_for_missed_tables(&mut record);
        assert_ne!(first, record.key_sections[0].section_id);
    }
}
