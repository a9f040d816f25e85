//! `relay normalize` — Build the canonical dispatch envelope from worker text.

use relay_core::envelope::{extract_candidates, normalize, sanitize_json_text, ShapeMarkers};

/// The envelope JSON, or the `{ "raw": ... }` fallback with an error flag
/// when nothing usable was recovered.
pub fn envelope_json(
    text: &str,
    markers: &ShapeMarkers,
    inline_threshold_bytes: u64,
) -> Result<serde_json::Value, serde_json::Value> {
    match normalize(extract_candidates(text, markers), inline_threshold_bytes) {
        Some(envelope) => Ok(envelope.to_json()),
        None => Err(serde_json::json!({ "raw": sanitize_json_text(text) })),
    }
}

pub fn run(
    source: &str,
    config_path: Option<&str>,
    inline_threshold: Option<u64>,
) -> Result<(), String> {
    let config = super::load_config(config_path)?;
    let text = super::read_input(source)?;
    let threshold = inline_threshold.unwrap_or(config.inline_threshold_bytes);

    match envelope_json(&text, &config.shape_markers(), threshold) {
        Ok(envelope) => {
            super::print_json(&envelope);
            Ok(())
        }
        Err(fallback) => {
            super::print_json(&fallback);
            Err("No dispatch envelope could be recovered".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_envelope_with_threshold() {
        let text = r#"{"email_to":"ops@example.com","subject":"Hi","body":"<p>x</p>","attachments":[{"filename":"big.csv","size_bytes":2048,"content_base64":"AAAA"}]}"#;
        let json = envelope_json(text, &ShapeMarkers::default(), 1024).unwrap();
        assert_eq!(json["email_to"], serde_json::json!(["ops@example.com"]));
        assert_eq!(json["email_subject"], "Hi");
        assert_eq!(json["attachments"][0]["action"], "omitted");
        assert!(json["attachments"][0].get("content_base64").map_or(true, |v| v.is_null()));
    }

    #[test]
    fn falls_back_to_raw() {
        let fallback = envelope_json("```\nnot json\n```", &ShapeMarkers::default(), 1024)
            .unwrap_err();
        assert_eq!(fallback["raw"], "not json");
    }
}
