//! Turn recovered candidates into one canonical dispatch envelope.

use base64::Engine;
use serde_json::{Map, Value};

use crate::models::{
    AttachmentAction, AttachmentDescriptor, AttachmentDiagnostic, CanonicalDispatchEnvelope,
    RecoveredCandidate, ShapeTag,
};

pub const DEFAULT_INLINE_THRESHOLD_BYTES: u64 = 300 * 1024;
pub const MERGED_AGENT: &str = "Merged/Orchestrator";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Select, merge and normalize candidates.
///
/// Returns `None` only when `candidates` yields nothing.
pub fn normalize<I>(candidates: I, inline_threshold_bytes: u64) -> Option<CanonicalDispatchEnvelope>
where
    I: IntoIterator<Item = RecoveredCandidate>,
{
    let mut first: Option<Map<String, Value>> = None;
    let mut email: Option<Map<String, Value>> = None;
    let mut energy: Option<Map<String, Value>> = None;

    for candidate in candidates {
        match candidate.shape {
            ShapeTag::Email => email = Some(candidate.json.clone()),
            ShapeTag::Energy => energy = Some(candidate.json.clone()),
            ShapeTag::Unknown => {}
        }
        if first.is_none() {
            first = Some(candidate.json);
        }
    }

    let (root, energy_out) = match (email, energy) {
        (Some(email), Some(energy)) => {
            // Both halves survive: fields resolve from the email half and the
            // energy half is carried to the output.
            tracing::info!("[Normalizer] Merged energy and email candidates ({})", MERGED_AGENT);
            (email, Some(Value::Object(energy)))
        }
        (Some(email), None) => {
            tracing::info!("[Normalizer] Selected email candidate");
            let carried = email.get("energy").filter(|v| v.is_object()).cloned();
            (email, carried)
        }
        (None, Some(energy)) => {
            tracing::info!("[Normalizer] Selected energy candidate");
            let value = Value::Object(energy.clone());
            (energy, Some(value))
        }
        (None, None) => {
            let first = first?;
            tracing::debug!("[Normalizer] No tagged candidate, using the first one");
            (first, None)
        }
    };

    let root = unwrap_arguments(root);
    Some(build_envelope(&root, energy_out, inline_threshold_bytes))
}

/// Tool-call shapes carry the real payload as a JSON string in `arguments`.
fn unwrap_arguments(root: Map<String, Value>) -> Map<String, Value> {
    if let Some(Value::String(args)) = root.get("arguments") {
        match serde_json::from_str::<Value>(args) {
            Ok(Value::Object(parsed)) => return parsed,
            Ok(_) => {
                tracing::warn!("[Normalizer] 'arguments' is not a JSON object, keeping root");
            }
            Err(e) => {
                tracing::warn!("[Normalizer] Failed to parse 'arguments' as JSON: {}", e);
            }
        }
    }
    root
}

/// First non-empty value among `keys`, looked up at the top level and then
/// under `data`.
fn first_field<'a>(root: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    let data = root.get("data").and_then(Value::as_object);
    let scopes = std::iter::once(root).chain(data);
    for scope in scopes {
        for key in keys {
            if let Some(value) = scope.get(*key) {
                if !is_empty(value) {
                    return Some(value);
                }
            }
        }
    }
    None
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn recipients(root: &Map<String, Value>) -> Vec<String> {
    match first_field(root, &["email_to", "emailTo"]) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn text_field(root: &Map<String, Value>, keys: &[&str]) -> String {
    first_field(root, keys)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn decoded_len(content: &str) -> u64 {
    base64::engine::general_purpose::STANDARD
        .decode(content.trim())
        .map(|bytes| bytes.len() as u64)
        .unwrap_or(0)
}

fn attachment(
    item: &Map<String, Value>,
    inline_threshold_bytes: u64,
) -> (AttachmentDescriptor, AttachmentDiagnostic) {
    let filename = item
        .get("filename")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let content_type = item
        .get("content_type")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    let content = item
        .get("content_base64")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    let size_bytes = item
        .get("size_bytes")
        .or_else(|| item.get("sizeBytes"))
        .and_then(Value::as_u64)
        .or_else(|| content.map(decoded_len))
        .unwrap_or(0);

    let action = AttachmentAction::for_size(size_bytes, inline_threshold_bytes);
    let note = match action {
        AttachmentAction::Inlined => None,
        AttachmentAction::Omitted => Some(format!(
            "Attachment omitted due to size > {} bytes",
            inline_threshold_bytes
        )),
        AttachmentAction::NoContent => Some("No inline content available".to_string()),
    };
    let content_base64 = match action {
        AttachmentAction::Inlined => content.map(str::to_string),
        _ => None,
    };
    if action == AttachmentAction::Omitted {
        tracing::info!(
            "[Normalizer] Omitting attachment '{}' ({} bytes > {})",
            filename,
            size_bytes,
            inline_threshold_bytes
        );
    }

    (
        AttachmentDescriptor {
            filename: filename.clone(),
            content_type,
            size_bytes,
            content_base64,
            action,
        },
        AttachmentDiagnostic {
            filename,
            original_size_bytes: size_bytes,
            action,
            note,
        },
    )
}

fn build_envelope(
    root: &Map<String, Value>,
    energy: Option<Value>,
    inline_threshold_bytes: u64,
) -> CanonicalDispatchEnvelope {
    let email_to = recipients(root);
    let subject = text_field(root, &["email_subject", "subject"]);
    let body_html = text_field(
        root,
        &["email_body_markdown", "email_body_html", "email_body", "body"],
    );

    let mut attachments = Vec::new();
    let mut diagnostics = Vec::new();
    if let Some(Value::Array(items)) = first_field(root, &["attachments"]) {
        for item in items.iter().filter_map(Value::as_object) {
            let (descriptor, diagnostic) = attachment(item, inline_threshold_bytes);
            attachments.push(descriptor);
            diagnostics.push(diagnostic);
        }
    }

    CanonicalDispatchEnvelope::assemble(
        email_to,
        subject,
        body_html,
        attachments,
        diagnostics,
        energy,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::recovery::{extract_candidates, ShapeMarkers};
    use serde_json::json;

    fn run(raw: &str, threshold: u64) -> Option<CanonicalDispatchEnvelope> {
        normalize(extract_candidates(raw, &ShapeMarkers::default()), threshold)
    }

    #[test]
    fn empty_sequence_yields_none() {
        assert!(run("no json", DEFAULT_INLINE_THRESHOLD_BYTES).is_none());
    }

    #[test]
    fn recipients_are_never_null() {
        let env = run("{\"email_to\": null, \"email_subject\": \"x\"}", 10).unwrap();
        assert!(env.email_to().is_empty());
        assert!(env.to_json()["email_to"].is_array());

        let env = run("{\"agent\":\"Energy\"}", 10).unwrap();
        assert!(env.to_json()["email_to"].is_array());
    }

    #[test]
    fn single_string_recipient_becomes_list() {
        let env = run("{\"data\":{\"email_to\":\"ops@example.com\"}}", 10).unwrap();
        assert_eq!(env.email_to(), &["ops@example.com".to_string()]);
        assert_eq!(env.data_mirror()["email_to_str"], "ops@example.com");
    }

    #[test]
    fn inlining_policy_and_diagnostics() {
        let small = base64::engine::general_purpose::STANDARD.encode(b"hello");
        let raw = json!({
            "email_to": ["a@b.com"],
            "attachments": [
                {"filename": "small.txt", "content_type": "text/plain", "content_base64": small},
                {"filename": "big.png", "size_bytes": 400000, "content_base64": "AAAA"},
                {"filename": "empty.csv"},
                {"filename": "bad.bin", "content_base64": "!!not base64!!"}
            ]
        })
        .to_string();
        let env = run(&raw, DEFAULT_INLINE_THRESHOLD_BYTES).unwrap();
        let atts = env.attachments();
        assert_eq!(atts.len(), env.diagnostics().len());

        assert_eq!(atts[0].action, AttachmentAction::Inlined);
        assert_eq!(atts[0].size_bytes, 5);
        assert_eq!(atts[0].content_base64.as_deref(), Some(small.as_str()));

        assert_eq!(atts[1].action, AttachmentAction::Omitted);
        assert_eq!(atts[1].content_base64, None);
        assert_eq!(atts[1].content_type, "application/octet-stream");
        assert_eq!(
            env.diagnostics()[1].note.as_deref(),
            Some("Attachment omitted due to size > 307200 bytes")
        );

        assert_eq!(atts[2].action, AttachmentAction::NoContent);
        assert_eq!(
            env.diagnostics()[2].note.as_deref(),
            Some("No inline content available")
        );
        assert_eq!(atts[3].size_bytes, 0);
        assert_eq!(atts[3].action, AttachmentAction::NoContent);
    }

    #[test]
    fn threshold_is_inclusive() {
        let raw = json!({"attachments": [
            {"filename": "a", "size_bytes": 100},
            {"filename": "b", "sizeBytes": 101}
        ]})
        .to_string();
        let env = run(&raw, 100).unwrap();
        assert_eq!(env.attachments()[0].action, AttachmentAction::Inlined);
        assert_eq!(env.attachments()[1].action, AttachmentAction::Omitted);
    }

    #[test]
    fn turn_array_merges_energy_and_email() {
        let turns = json!([
            "{\"task_id\":\"remote-phase-1\",\"zone\":\"SE3\"}",
            "Analysis done:\n```json\n{\"agent\":\"Energy\",\"savings_kwh\":42}\n```",
            "{\"agent\":\"EmailGenerator\",\"email_to\":[\"ops@example.com\"],\"email_subject\":\"Energy report\",\"email_body_markdown\":\"# Report\"}"
        ])
        .to_string();
        let env = run(&turns, DEFAULT_INLINE_THRESHOLD_BYTES).unwrap();
        assert_eq!(env.email_to(), &["ops@example.com".to_string()]);
        assert_eq!(env.subject(), "Energy report");
        assert_eq!(env.body_html(), "# Report");
        assert_eq!(env.energy().unwrap()["savings_kwh"], 42);
    }

    #[test]
    fn later_candidates_override_earlier() {
        let turns = json!([
            "{\"email_to\":[\"old@example.com\"]}",
            "{\"email_to\":[\"new@example.com\"]}"
        ])
        .to_string();
        let env = run(&turns, 10).unwrap();
        assert_eq!(env.email_to(), &["new@example.com".to_string()]);
    }

    #[test]
    fn energy_only_selection_populates_energy() {
        let env = run("{\"agent\":\"Energy\",\"kwh\":3}", 10).unwrap();
        assert_eq!(env.energy().unwrap()["kwh"], 3);
        assert_eq!(env.subject(), "");
    }

    #[test]
    fn tool_call_arguments_are_unwrapped() {
        let raw = json!({
            "agent": "EmailGenerator",
            "name": "send_email",
            "arguments": "{\"emailTo\":[\"x@y.com\"],\"subject\":\"Hi\",\"body\":\"<p>b</p>\"}"
        })
        .to_string();
        let env = run(&raw, 10).unwrap();
        assert_eq!(env.email_to(), &["x@y.com".to_string()]);
        assert_eq!(env.subject(), "Hi");
        assert_eq!(env.body_html(), "<p>b</p>");
    }

    #[test]
    fn untagged_input_uses_first_candidate() {
        let turns = json!(["{\"subject\":\"first\"}", "{\"subject\":\"second\"}"]).to_string();
        let env = run(&turns, 10).unwrap();
        assert_eq!(env.subject(), "first");
    }

    #[test]
    fn normalization_is_idempotent() {
        let small = base64::engine::general_purpose::STANDARD.encode(b"0123456789");
        let turns = json!([
            "{\"agent\":\"Energy\",\"kwh\":7}",
            json!({
                "agent": "EmailGenerator",
                "data": {
                    "email_to": "ops@example.com",
                    "email_subject": "Weekly",
                    "email_body_html": "<b>ok</b>",
                    "attachments": [
                        {"filename": "r.txt", "content_base64": small},
                        {"filename": "huge.bin", "size_bytes": 5000},
                        {"filename": "none.txt"}
                    ]
                }
            }).to_string()
        ])
        .to_string();
        let once = run(&turns, 1000).unwrap();
        let twice = run(&once.to_json().to_string(), 1000).unwrap();

        assert_eq!(once.email_to(), twice.email_to());
        assert_eq!(once.subject(), twice.subject());
        assert_eq!(once.body_html(), twice.body_html());
        assert_eq!(once.attachments(), twice.attachments());
        assert_eq!(once.diagnostics(), twice.diagnostics());
        assert_eq!(once.energy(), twice.energy());
    }
}
