//! `relay extract` — List the JSON objects recoverable from worker text.

use serde::Serialize;

use relay_core::envelope::{extract_candidates, ShapeMarkers};
use relay_core::models::ShapeTag;

#[derive(Debug, Serialize)]
struct CandidateSummary {
    start: usize,
    end: usize,
    path: Vec<usize>,
    shape: ShapeTag,
    json: serde_json::Map<String, serde_json::Value>,
}

pub fn candidates_json(text: &str, markers: &ShapeMarkers) -> serde_json::Value {
    let summaries: Vec<CandidateSummary> = extract_candidates(text, markers)
        .map(|c| CandidateSummary {
            start: c.span.start,
            end: c.span.end,
            path: c.path,
            shape: c.shape,
            json: c.json,
        })
        .collect();
    serde_json::to_value(summaries).unwrap_or(serde_json::Value::Null)
}

pub fn run(source: &str, config_path: Option<&str>) -> Result<(), String> {
    let config = super::load_config(config_path)?;
    let text = super::read_input(source)?;
    let candidates = candidates_json(&text, &config.shape_markers());

    if candidates.as_array().map(Vec::is_empty).unwrap_or(true) {
        return Err("No JSON objects could be recovered from the input".to_string());
    }
    super::print_json(&candidates);
    Ok(())
}
