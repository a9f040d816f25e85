//! Get-or-create worker directory over the agents REST API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AgentsClient, WorkerDirectory, WorkerHandle};
use crate::config::RelayConfig;
use crate::error::PipelineError;

pub struct HttpWorkerDirectory {
    client: AgentsClient,
    config: Arc<RelayConfig>,
    /// Resolved workers, kept for the process lifetime.
    cache: Mutex<HashMap<String, WorkerHandle>>,
}

impl HttpWorkerDirectory {
    pub fn new(client: AgentsClient, config: Arc<RelayConfig>) -> Self {
        Self {
            client,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn handle_from(&self, name: &str, id: &str, body: &serde_json::Value) -> WorkerHandle {
        let mut handle = WorkerHandle::new(name, id);
        if let Some(display) = body.get("name").and_then(|n| n.as_str()) {
            if !display.is_empty() {
                handle.display_name = display.to_string();
            }
        }
        handle
    }

    async fn verify(&self, name: &str, id: &str) -> Option<WorkerHandle> {
        match self.client.get(&format!("assistants/{}", id)).await {
            Ok(body) => {
                tracing::info!("[Directory] Found {} worker {} on server; reusing", name, id);
                Some(self.handle_from(name, id, &body))
            }
            Err(PipelineError::Transport {
                status: Some(404), ..
            }) => {
                tracing::warn!(
                    "[Directory] {} worker id {} not found (404); will attempt creation",
                    name,
                    id
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    "[Directory] Error verifying {} worker id {}: {}; will attempt creation",
                    name,
                    id,
                    e
                );
                None
            }
        }
    }

    async fn create(&self, name: &str) -> Result<WorkerHandle, PipelineError> {
        let provisioning = |reason: String| PipelineError::Provisioning {
            stage: name.to_string(),
            reason,
        };

        let model = self.config.worker_model(name).ok_or_else(|| {
            tracing::warn!("[Directory] No model configured; cannot create {} worker", name);
            provisioning("no model configured".to_string())
        })?;

        let body = serde_json::json!({
            "model": model,
            "name": name,
            "instructions": self.config.worker_instructions(name),
        });
        let created = self
            .client
            .post("assistants", &body)
            .await
            .map_err(|e| provisioning(e.to_string()))?;

        let id = created
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| provisioning("creation returned no id".to_string()))?;

        tracing::info!("[Directory] Created {} worker with id {}", name, id);
        Ok(self.handle_from(name, id, &created))
    }
}

#[async_trait]
impl WorkerDirectory for HttpWorkerDirectory {
    async fn get_or_create_worker(&self, name: &str) -> Result<WorkerHandle, PipelineError> {
        if let Some(handle) = self.cache.lock().await.get(name).cloned() {
            return Ok(handle);
        }

        // Resolved without holding the cache lock; a concurrent resolution of
        // the same name keeps whichever handle was inserted first.
        let verified = match self.config.worker_id(name) {
            Some(id) => self.verify(name, &id).await,
            None => None,
        };
        let handle = match verified {
            Some(handle) => handle,
            None => self.create(name).await?,
        };

        let mut cache = self.cache.lock().await;
        Ok(cache.entry(name.to_string()).or_insert(handle).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn directory(server: &MockServer, config: RelayConfig) -> HttpWorkerDirectory {
        let client = AgentsClient::new(server.base_url(), None, "v1", Duration::from_secs(5));
        HttpWorkerDirectory::new(client, Arc::new(config))
    }

    fn worker(id: Option<&str>, model: Option<&str>) -> WorkerConfig {
        WorkerConfig {
            id: id.map(str::to_string),
            model: model.map(str::to_string),
            instructions: Some("Be precise".to_string()),
        }
    }

    #[tokio::test]
    async fn reuses_existing_worker() {
        let server = MockServer::start_async().await;
        let get = server
            .mock_async(|when, then| {
                when.method(GET).path("/assistants/asst_1");
                then.status(200)
                    .json_body(serde_json::json!({"id": "asst_1", "name": "Energy Analyst"}));
            })
            .await;

        let mut config = RelayConfig::default();
        config.workers.insert("Energy".to_string(), worker(Some("asst_1"), None));
        let dir = directory(&server, config);

        let first = dir.get_or_create_worker("Energy").await.unwrap();
        let second = dir.get_or_create_worker("Energy").await.unwrap();
        assert_eq!(first.worker_id, "asst_1");
        assert_eq!(first.display_name, "Energy Analyst");
        assert_eq!(first, second);
        get.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn creates_worker_when_id_is_unknown() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/assistants/stale");
                then.status(404).body("not found");
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/assistants")
                    .body_contains("\"model\":\"gpt-4o\"")
                    .body_contains("\"name\":\"Energy\"");
                then.status(200).json_body(serde_json::json!({"id": "asst_new"}));
            })
            .await;

        let mut config = RelayConfig::default();
        config.workers.insert("Energy".to_string(), worker(Some("stale"), Some("gpt-4o")));
        let dir = directory(&server, config);

        let handle = dir.get_or_create_worker("Energy").await.unwrap();
        assert_eq!(handle.worker_id, "asst_new");
        create.assert_async().await;
    }

    #[tokio::test]
    async fn missing_model_is_a_provisioning_error() {
        let server = MockServer::start_async().await;
        let dir = directory(&server, RelayConfig::default());
        let err = dir.get_or_create_worker("RemoteDataTestOnly").await.unwrap_err();
        assert!(matches!(err, PipelineError::Provisioning { ref stage, .. } if stage == "RemoteDataTestOnly"));
        assert_eq!(
            err.to_json("r")["error"],
            "Failed to obtain or create RemoteDataTestOnly agent"
        );
    }

    #[tokio::test]
    async fn slow_lookup_does_not_block_other_workers() {
        let server = MockServer::start_async().await;
        for id in ["asst_a", "asst_b"] {
            server
                .mock_async(|when, then| {
                    when.method(GET).path(format!("/assistants/{}", id));
                    then.status(200)
                        .delay(Duration::from_millis(400))
                        .json_body(serde_json::json!({ "id": id }));
                })
                .await;
        }

        let mut config = RelayConfig::default();
        config.workers.insert("Energy".to_string(), worker(Some("asst_a"), None));
        config.workers.insert("RemoteData".to_string(), worker(Some("asst_b"), None));
        let dir = directory(&server, config);

        let started = std::time::Instant::now();
        let (energy, remote) = tokio::join!(
            dir.get_or_create_worker("Energy"),
            dir.get_or_create_worker("RemoteData")
        );
        assert_eq!(energy.unwrap().worker_id, "asst_a");
        assert_eq!(remote.unwrap().worker_id, "asst_b");
        assert!(started.elapsed() < Duration::from_millis(750));
    }

    #[tokio::test]
    async fn failed_creation_is_a_provisioning_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/assistants");
                then.status(500).body("boom");
            })
            .await;
        let mut config = RelayConfig::default();
        config.model = Some("gpt-4o".to_string());
        let dir = directory(&server, config);
        assert!(matches!(
            dir.get_or_create_worker("Energy").await,
            Err(PipelineError::Provisioning { .. })
        ));
    }
}
