use std::collections::HashMap;

use async_trait::async_trait;

use super::{WorkerDirectory, WorkerHandle};
use crate::config::RelayConfig;
use crate::error::PipelineError;

/// Worker directory backed by a fixed name → id map.
#[derive(Debug, Clone, Default)]
pub struct StaticWorkerDirectory {
    workers: HashMap<String, String>,
}

impl StaticWorkerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker(mut self, name: impl Into<String>, worker_id: impl Into<String>) -> Self {
        self.workers.insert(name.into(), worker_id.into());
        self
    }

    /// Every stage (and the sender) that has an id in `config`.
    pub fn from_config(config: &RelayConfig) -> Self {
        let names = config.stages.iter().chain(config.sender_stage.iter());
        let workers = names
            .filter_map(|name| config.worker_id(name).map(|id| (name.clone(), id)))
            .collect();
        Self { workers }
    }
}

#[async_trait]
impl WorkerDirectory for StaticWorkerDirectory {
    async fn get_or_create_worker(&self, name: &str) -> Result<WorkerHandle, PipelineError> {
        match self.workers.get(name).filter(|id| !id.trim().is_empty()) {
            Some(id) => Ok(WorkerHandle::new(name, id.clone())),
            None => Err(PipelineError::Provisioning {
                stage: name.to_string(),
                reason: "no worker id configured".to_string(),
            }),
        }
    }
}
