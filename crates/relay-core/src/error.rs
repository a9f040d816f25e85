//! Core error type for the relay pipeline.
//!
//! `PipelineError` is returned by the coordinator, the worker directory and
//! the remote execution adapters. Every variant has a canonical JSON
//! rendering (see [`PipelineError::to_json`]) so that `run_async` can always
//! hand its caller valid JSON instead of a fault.

use std::collections::BTreeMap;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to obtain or create {stage} agent: {reason}")]
    Provisioning { stage: String, reason: String },

    #[error("Stages '{first}' and '{second}' resolve to the same worker '{worker_id}'")]
    DuplicateIdentity {
        first: String,
        second: String,
        worker_id: String,
    },

    #[error("Transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    #[error("Run incomplete: {reason}")]
    Incomplete {
        reason: String,
        partial: BTreeMap<String, String>,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    pub fn transport_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Whether the failure looks like an HTTP/transport problem in a
    /// downstream tool rather than in the pipeline itself.
    pub fn looks_like_downstream_failure(&self) -> bool {
        match self {
            PipelineError::Transport { message, status } => {
                if status.map(|s| s >= 500).unwrap_or(false) {
                    return true;
                }
                let lower = message.to_lowercase();
                ["http", "502", "504", "bad gateway", "timeout", "connection", "proxy"]
                    .iter()
                    .any(|marker| lower.contains(marker))
            }
            PipelineError::Incomplete { reason, .. } => {
                let lower = reason.to_lowercase();
                lower.contains("timeout") || lower.contains("connection")
            }
            _ => false,
        }
    }

    /// Render the error in the canonical error-JSON shape.
    ///
    /// Errors raised before execution use `{ "error": ... }`; errors raised
    /// while a run was in flight carry the run id.
    pub fn to_json(&self, run_id: &str) -> serde_json::Value {
        match self {
            PipelineError::Provisioning { stage, .. } => serde_json::json!({
                "error": format!("Failed to obtain or create {} agent", stage),
            }),
            PipelineError::DuplicateIdentity {
                first,
                second,
                worker_id,
            } => serde_json::json!({
                "error": self.to_string(),
                "stages": [first, second],
                "workerId": worker_id,
            }),
            PipelineError::Config(_) | PipelineError::Internal(_) => serde_json::json!({
                "error": self.to_string(),
            }),
            PipelineError::Transport { .. } => serde_json::json!({
                "runId": run_id,
                "message": self.to_string(),
            }),
            PipelineError::Incomplete { partial, .. } => serde_json::json!({
                "runId": run_id,
                "message": self.to_string(),
                "partial": partial,
            }),
            PipelineError::Cancelled => serde_json::json!({
                "runId": run_id,
                "message": "run cancelled",
            }),
        }
    }
}
