//! Bounded-depth utilities for schema-free model JSON.
//!
//! Model responses wrap their JSON in prose, nest the interesting fields at
//! unpredictable depths, and vary key names between runs. These helpers keep
//! that messiness in one place:
//!
//! * [`first_json_object`] pulls the first balanced top-level `{...}` out of
//!   raw response text.
//! * [`find_key`] searches a value tree for any of several candidate keys,
//!   direct hits first, then nested objects.
//! * [`harvest_text`] collects every string in a tree, skipping structural
//!   keys.
//! * [`fingerprint`] produces a stable content hash for deduplication and
//!   section identifiers.
//!
//! Recursion depth is capped at [`MAX_SEARCH_DEPTH`] as a hard invariant —
//! adversarially deep model output must not blow the stack.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hard cap for all recursive tree walks in this module.
pub const MAX_SEARCH_DEPTH: usize = 5;

/// Keys never descended into or harvested as content.
const STRUCTURAL_KEYS: &[&str] = &["metadata", "headers", "rows"];

/// Locate the first top-level JSON object in raw model text.
///
/// String-aware brace scan: braces inside JSON string literals (and escaped
/// quotes inside those) do not count. Tolerates any amount of surrounding
/// prose. Returns the slice spanning the balanced object.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the first JSON object found in raw model text.
pub fn parse_first_object(text: &str) -> Option<Value> {
    serde_json::from_str(first_json_object(text)?).ok()
}

/// Search a value tree for the first of `keys`, in order of preference.
///
/// Direct keys on the current object win over nested hits; nested objects
/// are searched in iteration order up to `depth` levels down.
pub fn find_key<'a>(data: &'a Value, keys: &[&str], depth: usize) -> Option<&'a Value> {
    if depth == 0 {
        return None;
    }
    let map = data.as_object()?;

    for key in keys {
        if let Some(value) = map.get(*key) {
            if !value.is_null() {
                return Some(value);
            }
        }
    }

    for value in map.values() {
        if value.is_object() {
            if let Some(found) = find_key(value, keys, depth - 1) {
                return Some(found);
            }
        }
    }
    None
}

/// Collect all text content from a tree, skipping structural keys.
///
/// Fragments are joined with single spaces; the result is trimmed.
pub fn harvest_text(data: &Value, depth: usize) -> String {
    fn walk(data: &Value, depth: usize, out: &mut Vec<String>) {
        if depth == 0 {
            return;
        }
        match data {
            Value::String(s) => {
                if !s.trim().is_empty() {
                    out.push(s.trim().to_string());
                }
            }
            Value::Object(map) => {
                for (key, value) in map {
                    if !STRUCTURAL_KEYS.contains(&key.as_str()) {
                        walk(value, depth - 1, out);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    walk(item, depth - 1, out);
                }
            }
            _ => {}
        }
    }

    let mut fragments = Vec::new();
    walk(data, depth, &mut fragments);
    fragments.join(" ").trim().to_string()
}

/// Stable content hash of any serializable value.
///
/// Object keys are sorted before hashing so the fingerprint is independent
/// of field order — the property that makes merge deduplication idempotent.
pub fn fingerprint<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_value(value).unwrap_or(Value::Null);
    let mut canonical = String::new();
    write_canonical(&json, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{:x}", digest)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_object_tolerates_prose() {
        let text = r#"Sure, here is the analysis you asked for:
{"a": 1, "b": {"c": 2}}
Let me know if you need anything else."#;
        assert_eq!(first_json_object(text), Some(r#"{"a": 1, "b": {"c": 2}}"#));
    }

    #[test]
    fn first_object_ignores_braces_in_strings() {
        let text = r#"{"a": "literal } brace", "b": "and \" escaped"}"#;
        let parsed = parse_first_object(text).unwrap();
        assert_eq!(parsed["a"], "literal } brace");
    }

    #[test]
    fn first_object_none_when_unbalanced() {
        assert!(first_json_object("{\"a\": 1").is_none());
        assert!(first_json_object("no json here").is_none());
    }

    #[test]
    fn find_key_prefers_direct_over_nested() {
        let data = json!({
            "outer": {"title": "nested"},
            "title": "direct"
        });
        assert_eq!(
            find_key(&data, &["title"], MAX_SEARCH_DEPTH),
            Some(&json!("direct"))
        );
    }

    #[test]
    fn find_key_recurses_into_objects() {
        let data = json!({"wrapper": {"inner": {"summary": "found"}}});
        assert_eq!(
            find_key(&data, &["summary"], MAX_SEARCH_DEPTH),
            Some(&json!("found"))
        );
    }

    #[test]
    fn find_key_respects_depth_cap() {
        let mut data = json!("leaf");
        for _ in 0..8 {
            data = json!({ "level": data });
        }
        // The target string sits 8 levels down; the capped walk must miss it.
        assert!(find_key(&data, &["level"], MAX_SEARCH_DEPTH).is_some());
        let deep = json!({"a": {"b": {"c": {"d": {"e": {"target": "x"}}}}}});
        assert!(find_key(&deep, &["target"], MAX_SEARCH_DEPTH).is_none());
    }

    #[test]
    fn harvest_skips_structural_keys() {
        let data = json!({
            "text": "keep me",
            "rows": [["drop", "me"]],
            "nested": {"headers": ["gone"], "note": "also kept"}
        });
        let text = harvest_text(&data, MAX_SEARCH_DEPTH);
        assert!(text.contains("keep me"));
        assert!(text.contains("also kept"));
        assert!(!text.contains("drop"));
        assert!(!text.contains("gone"));
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = json!({"x": 1, "y": [1, 2]});
        let b = json!({"y": [1, 2], "x": 1});
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&json!({"x": 1, "y": [2, 1]})));
    }
}
