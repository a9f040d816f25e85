//! Recover JSON objects from free-form worker text.
//!
//! Workers answer with bare JSON, JSON wrapped in prose, JSON inside markdown
//! fences, or an array of conversation turns whose elements are themselves
//! strings containing JSON. [`extract_candidates`] walks all of these and
//! yields every object it can recover, in textual order.

use std::ops::Range;

use serde_json::Value;

use crate::models::{RecoveredCandidate, ShapeTag};

/// Agent tags used to classify recovered objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMarkers {
    pub email_agent: String,
    pub energy_agent: String,
}

impl Default for ShapeMarkers {
    fn default() -> Self {
        Self {
            email_agent: "EmailGenerator".to_string(),
            energy_agent: "Energy".to_string(),
        }
    }
}

impl ShapeMarkers {
    pub fn classify(&self, obj: &serde_json::Map<String, Value>) -> ShapeTag {
        let agent = obj.get("agent").and_then(Value::as_str);
        let nested_email_to = obj
            .get("data")
            .and_then(Value::as_object)
            .map(|d| d.contains_key("email_to"))
            .unwrap_or(false);

        if obj.contains_key("email_to")
            || obj.contains_key("attachments")
            || nested_email_to
            || agent == Some(self.email_agent.as_str())
        {
            ShapeTag::Email
        } else if agent == Some(self.energy_agent.as_str()) {
            ShapeTag::Energy
        } else {
            ShapeTag::Unknown
        }
    }
}

/// Strip markdown code fences or single-backtick wrapping.
///
/// A fenced block is unwrapped only when its closing fence comes after the
/// end of the opening fence line. The result is always trimmed.
pub fn sanitize_json_text(raw: &str) -> String {
    let txt = raw.trim();
    if txt.is_empty() {
        return String::new();
    }

    if let Some(first_fence) = txt.find("```") {
        if let Some(nl) = txt[first_fence..].find('\n') {
            let start_line_end = first_fence + nl;
            if let Some(last_fence) = txt.rfind("```") {
                if last_fence > start_line_end {
                    return txt[start_line_end + 1..last_fence].trim().to_string();
                }
            }
        }
    }

    if txt.len() >= 2 && txt.starts_with('`') && txt.ends_with('`') {
        return txt.trim_matches('`').trim().to_string();
    }

    txt.to_string()
}

/// Locate the first balanced `{...}` block (or `[...]` when the text has no
/// `{`) and parse it.
///
/// Depth counts only the chosen bracket pair and is not string-aware, so a
/// closing brace inside a string literal ends the block early.
fn scan_balanced(text: &str) -> Option<(Value, Range<usize>)> {
    let start = text.find('{').or_else(|| text.find('['))?;
    let open = text[start..].chars().next()?;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth: usize = 0;
    for (offset, c) in text[start..].char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.saturating_sub(1);
        }
        if depth == 0 {
            let end = start + offset + c.len_utf8();
            return serde_json::from_str::<Value>(&text[start..end])
                .ok()
                .map(|v| (v, start..end));
        }
    }
    None
}

/// Parse one piece of text into a JSON root (object or array).
fn recover_root(raw: &str) -> Option<(Value, Range<usize>)> {
    let cleaned = sanitize_json_text(raw);
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        if value.is_object() || value.is_array() {
            let len = cleaned.len();
            return Some((value, 0..len));
        }
    }
    let found = scan_balanced(&cleaned);
    if found.is_none() {
        tracing::debug!("[Recovery] No JSON object or array found in {} bytes", cleaned.len());
    }
    found
}

#[derive(Clone)]
enum Work {
    Text { text: String, path: Vec<usize> },
    Value {
        value: Value,
        span: Range<usize>,
        path: Vec<usize>,
    },
}

/// Lazy iterator over the objects recoverable from a text.
///
/// Nothing is parsed until the first `next()`. Cloning before iterating
/// gives an independent restart from the same text.
#[derive(Clone)]
pub struct Candidates {
    markers: ShapeMarkers,
    stack: Vec<Work>,
}

impl Iterator for Candidates {
    type Item = RecoveredCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(work) = self.stack.pop() {
            match work {
                Work::Text { text, path } => {
                    if let Some((value, span)) = recover_root(&text) {
                        self.stack.push(Work::Value { value, span, path });
                    }
                }
                Work::Value {
                    value: Value::Object(json),
                    span,
                    path,
                } => {
                    let shape = self.markers.classify(&json);
                    return Some(RecoveredCandidate {
                        span,
                        path,
                        shape,
                        json,
                    });
                }
                Work::Value {
                    value: Value::Array(items),
                    span,
                    path,
                } => {
                    // Reverse so elements pop in textual order.
                    for (idx, item) in items.into_iter().enumerate().rev() {
                        let mut child_path = path.clone();
                        child_path.push(idx);
                        match item {
                            Value::String(text) => self.stack.push(Work::Text {
                                text,
                                path: child_path,
                            }),
                            value @ (Value::Object(_) | Value::Array(_)) => {
                                self.stack.push(Work::Value {
                                    value,
                                    span: span.clone(),
                                    path: child_path,
                                })
                            }
                            _ => {}
                        }
                    }
                }
                Work::Value { .. } => {}
            }
        }
        None
    }
}

/// Recover every JSON object in `raw`, in textual order.
///
/// Spans of array elements are the span of the enclosing array; elements
/// that are strings are re-parsed and carry spans relative to that string.
pub fn extract_candidates(raw: &str, markers: &ShapeMarkers) -> Candidates {
    Candidates {
        markers: markers.clone(),
        stack: vec![Work::Text {
            text: raw.to_string(),
            path: Vec::new(),
        }],
    }
}

/// The first JSON object or array recoverable from `raw`, if any.
pub fn recover_json(raw: &str) -> Option<Value> {
    recover_root(raw).map(|(value, _)| value)
}
