//! `relay gate` — Show whether a request would trigger email dispatch.

use relay_core::dispatch;

pub fn decision_json(text: &str) -> serde_json::Value {
    serde_json::to_value(dispatch::evaluate(text)).unwrap_or(serde_json::Value::Null)
}

pub fn run(text: &str) -> Result<(), String> {
    super::print_json(&decision_json(text));
    Ok(())
}
