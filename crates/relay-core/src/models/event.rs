use serde::{Deserialize, Serialize};

/// One event of a streamed pipeline run.
///
/// `Update` may be partial or a full resend of everything the stage has
/// produced so far. `Output` is the terminal result of the whole run and is
/// emitted once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    Update { stage_id: String, text: String },
    Output {
        stage_id: String,
        payload: serde_json::Value,
    },
}

impl StageEvent {
    pub fn update(stage_id: impl Into<String>, text: impl Into<String>) -> Self {
        StageEvent::Update {
            stage_id: stage_id.into(),
            text: text.into(),
        }
    }

    pub fn output(stage_id: impl Into<String>, payload: serde_json::Value) -> Self {
        StageEvent::Output {
            stage_id: stage_id.into(),
            payload,
        }
    }

    pub fn stage_id(&self) -> &str {
        match self {
            StageEvent::Update { stage_id, .. } | StageEvent::Output { stage_id, .. } => stage_id,
        }
    }
}

/// Select the final text of a run from its terminal payload.
///
/// Conversation-turn arrays (strings, or `{role, content}` objects) yield
/// the last turn that looks like JSON; any other payload is the final text
/// as a whole.
pub fn select_final_text(payload: &serde_json::Value) -> Option<String> {
    match payload {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => {
            let turns: Vec<Option<&str>> = items.iter().map(turn_text).collect();
            if !turns.is_empty() && turns.iter().all(Option::is_some) {
                let chosen = turns.iter().rev().flatten().find(|t| {
                    let t = t.trim_start();
                    t.starts_with('{') || t.starts_with('[')
                });
                if let Some(text) = chosen {
                    return Some((*text).to_string());
                }
            }
            Some(payload.to_string())
        }
        other => Some(other.to_string()),
    }
}

fn turn_text(item: &serde_json::Value) -> Option<&str> {
    match item {
        serde_json::Value::String(s) => Some(s.as_str()),
        serde_json::Value::Object(map) => map.get("content").and_then(|c| c.as_str()),
        _ => None,
    }
}
