//! Run artifact writer.
//!
//! The milestone's recovered JSON (the last turn that yields any, for turn
//! arrays) is written pretty-printed to
//! `<artifact_dir>/last_agent_output.json`. When nothing parses, the cleaned
//! text is saved as `{ "raw": ... }` instead. Write failures are logged and
//! never fail the run.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::envelope::{recover_json, sanitize_json_text};

pub const LAST_OUTPUT_FILE: &str = "last_agent_output.json";

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    base_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn last_output_path(&self) -> PathBuf {
        self.base_dir.join(LAST_OUTPUT_FILE)
    }

    /// Save the milestone text, recovered JSON first, `{raw}` fallback.
    pub async fn save_last_output(&self, text: &str) -> Result<PathBuf, ArtifactWriteError> {
        let document = artifact_document(text);
        let pretty = serde_json::to_string_pretty(&document)
            .map_err(|e| ArtifactWriteError::Serialization(e.to_string()))?;

        fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| ArtifactWriteError::Io(format!("Failed to create artifact dir: {}", e)))?;

        let path = self.last_output_path();
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| ArtifactWriteError::Io(e.to_string()))?;
        file.write_all(pretty.as_bytes())
            .await
            .map_err(|e| ArtifactWriteError::Io(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| ArtifactWriteError::Io(e.to_string()))?;

        Ok(path)
    }

    /// Save the milestone text, logging errors but never failing.
    pub async fn save_last_output_safe(&self, text: &str) {
        match self.save_last_output(text).await {
            Ok(path) => tracing::info!("[Artifacts] Saved milestone output to {}", path.display()),
            Err(e) => tracing::warn!("[Artifacts] Failed to save milestone output: {}", e),
        }
    }
}

/// Recovered JSON of `text`, or `{ "raw": <cleaned text> }`.
///
/// For a conversation-turn array (all strings) the last turn that yields
/// JSON is saved rather than the array itself.
pub fn artifact_document(text: &str) -> serde_json::Value {
    if let Ok(serde_json::Value::Array(turns)) = serde_json::from_str::<serde_json::Value>(text) {
        if !turns.is_empty() && turns.iter().all(serde_json::Value::is_string) {
            return turns
                .iter()
                .rev()
                .filter_map(serde_json::Value::as_str)
                .find_map(recover_json)
                .unwrap_or_else(|| serde_json::json!({ "raw": sanitize_json_text(text) }));
        }
    }
    recover_json(text).unwrap_or_else(|| serde_json::json!({ "raw": sanitize_json_text(text) }))
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactWriteError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("docs"));
        let path = writer
            .save_last_output("```json\n{\"agent\":\"Energy\",\"kwh\":5}\n```")
            .await
            .unwrap();
        let saved = std::fs::read_to_string(path).unwrap();
        assert!(saved.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&saved).unwrap();
        assert_eq!(value["kwh"], 5);
    }

    #[tokio::test]
    async fn unparseable_text_is_saved_raw() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        writer.save_last_output_safe("`no json at all`").await;
        let saved = std::fs::read_to_string(writer.last_output_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&saved).unwrap();
        assert_eq!(value["raw"], "no json at all");
    }

    #[test]
    fn turn_arrays_keep_the_last_recoverable_turn() {
        let turns = serde_json::json!([
            "{\"agent\":\"Energy\",\"kwh\":5}",
            "Draft:\n```json\n{\"agent\":\"EmailGenerator\",\"email_to\":[\"a@b.com\"]}\n```",
            "Thanks, that is all."
        ])
        .to_string();
        let document = artifact_document(&turns);
        assert_eq!(document["agent"], "EmailGenerator");
        assert!(document.get("raw").is_none());

        let prose = serde_json::json!(["one", "two"]).to_string();
        assert!(artifact_document(&prose)["raw"].as_str().unwrap().contains("two"));

        // Plain arrays are still documents in their own right.
        assert_eq!(artifact_document("[1, 2]"), serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn write_failure_does_not_panic() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file cannot act as the artifact directory.
        let writer = ArtifactWriter::new(file.path());
        assert!(writer.save_last_output("{}").await.is_err());
        writer.save_last_output_safe("{}").await;
    }
}
