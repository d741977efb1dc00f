//! Tolerant parsing of structured model output
//!
//! Models asked for strict JSON still wrap it in prose or code fences. The
//! text is parsed directly first; failing that, balanced top-level `{...}`
//! spans are isolated in order and the first one that parses wins.

use serde_json::Value;

use crate::error::{RecollectError, Result};

/// Byte ranges of balanced top-level `{...}` spans, string and escape aware
fn balanced_object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if depth == 0 {
            if c == '{' {
                depth = 1;
                start = i;
                in_string = false;
                escaped = false;
            }
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    spans.push((start, i + 1));
                }
            }
            _ => {}
        }
    }

    spans
}

/// First balanced top-level `{...}` span in `text`
pub fn first_balanced_object(text: &str) -> Option<&str> {
    balanced_object_spans(text)
        .first()
        .map(|&(start, end)| &text[start..end])
}

/// Parse a JSON object out of free-form model output
pub fn parse_json_object(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    for (start, end) in balanced_object_spans(trimmed) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&trimmed[start..end]) {
            return Ok(value);
        }
    }

    let preview: String = trimmed.chars().take(120).collect();
    Err(RecollectError::MalformedResponse(format!(
        "No JSON object found in: {}",
        preview
    )))
}
