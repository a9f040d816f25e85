//! Ports to the remote agents service and their adapters.
//!
//! The coordinator only sees [`WorkerDirectory`] and
//! [`RemoteExecutionService`]. Adapters:
//!
//! - [`StaticWorkerDirectory`]: name → id map from configuration
//! - [`HttpWorkerDirectory`]: get-or-create against the agents REST API
//! - [`HttpExecutionService`]: thread/run/poll execution over REST
//! - [`ScriptedExecutionService`]: in-process scripted workers

pub mod client;
pub mod http_directory;
pub mod http_execution;
pub mod scripted;
pub mod static_directory;

use std::pin::Pin;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::models::StageEvent;

pub use client::AgentsClient;
pub use http_directory::HttpWorkerDirectory;
pub use http_execution::HttpExecutionService;
pub use scripted::ScriptedExecutionService;
pub use static_directory::StaticWorkerDirectory;

pub type StageEventStream =
    Pin<Box<dyn tokio_stream::Stream<Item = Result<StageEvent, PipelineError>> + Send>>;

/// A resolved remote worker for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    /// Stage name, also used as the `stage_id` of its events.
    pub stage: String,
    /// Remote identity. Two stages must never share one.
    pub worker_id: String,
    pub display_name: String,
}

impl WorkerHandle {
    pub fn new(stage: impl Into<String>, worker_id: impl Into<String>) -> Self {
        let stage = stage.into();
        Self {
            display_name: stage.clone(),
            stage,
            worker_id: worker_id.into(),
        }
    }
}

/// An opened run whose event listener is already attached.
///
/// Events only start flowing after [`PendingRun::start`], so nothing the
/// service emits can be missed by the consumer.
pub struct PendingRun {
    run_id: String,
    events: StageEventStream,
    start: oneshot::Sender<()>,
}

impl PendingRun {
    pub fn new(run_id: impl Into<String>, events: StageEventStream, start: oneshot::Sender<()>) -> Self {
        Self {
            run_id: run_id.into(),
            events,
            start,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Send the start signal and hand back the attached event stream.
    pub fn start(self) -> StageEventStream {
        if self.start.send(()).is_err() {
            tracing::warn!("[Remote] Run {} dropped before start", self.run_id);
        }
        self.events
    }
}

#[async_trait]
pub trait WorkerDirectory: Send + Sync {
    /// Resolve the worker for `name`, creating it remotely when needed.
    async fn get_or_create_worker(&self, name: &str) -> Result<WorkerHandle, PipelineError>;
}

#[async_trait]
pub trait RemoteExecutionService: Send + Sync {
    /// Open a sequential run over `workers` seeded with `initial_message`.
    async fn open_run(
        &self,
        workers: &[WorkerHandle],
        initial_message: &str,
        cancel: CancellationToken,
    ) -> Result<PendingRun, PipelineError>;
}
