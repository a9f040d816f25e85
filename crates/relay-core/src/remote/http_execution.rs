//! Remote execution over the agents REST API.
//!
//! One pipeline run maps onto the thread/run protocol:
//!
//! ```text
//! POST /threads                          -> thread id
//! POST /threads/{t}/messages             initial message (user role)
//! for each worker:
//!   POST /threads/{t}/runs               { assistant_id } -> run id
//!   GET  /threads/{t}/runs/{r}           poll until not queued/in_progress
//!   GET  /threads/{t}/messages?order=asc Update with the stage's full text
//! Output: every text turn of the conversation, as a JSON array of strings
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::{AgentsClient, PendingRun, RemoteExecutionService, WorkerHandle};
use crate::config::{ConversationMode, RelayConfig};
use crate::error::PipelineError;
use crate::models::StageEvent;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct HttpExecutionService {
    client: AgentsClient,
    poll_interval: Duration,
    max_poll_attempts: Option<u32>,
    conversation: ConversationMode,
}

impl HttpExecutionService {
    pub fn new(client: AgentsClient, config: &RelayConfig) -> Self {
        Self {
            client,
            poll_interval: config.poll_interval(),
            max_poll_attempts: config.max_poll_attempts,
            conversation: config.conversation,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// One message of a remote thread.
#[derive(Debug, Clone, PartialEq)]
struct ThreadMessage {
    role: String,
    run_id: Option<String>,
    text: String,
}

fn parse_messages(body: &Value) -> Vec<ThreadMessage> {
    let Some(items) = body.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| {
            let text = item
                .get("content")
                .and_then(Value::as_array)
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                        .filter_map(|b| {
                            b.pointer("/text/value")
                                .or_else(|| b.get("text"))
                                .and_then(Value::as_str)
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .or_else(|| item.get("content").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default();
            ThreadMessage {
                role: item
                    .get("role")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                run_id: item.get("run_id").and_then(Value::as_str).map(str::to_string),
                text,
            }
        })
        .collect()
}

/// Race a remote call against cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = fut => result,
    }
}

struct Execution {
    client: AgentsClient,
    poll_interval: Duration,
    max_poll_attempts: Option<u32>,
    conversation: ConversationMode,
    workers: Vec<WorkerHandle>,
    initial_message: String,
    cancel: CancellationToken,
    tx: mpsc::Sender<Result<StageEvent, PipelineError>>,
}

impl Execution {
    async fn run(self) {
        if let Err(e) = self.drive().await {
            let _ = self.tx.send(Err(e)).await;
        }
    }

    async fn open_thread(&self) -> Result<String, PipelineError> {
        let thread = cancellable(&self.cancel, self.client.post("threads", &serde_json::json!({})))
            .await?;
        let thread_id = thread
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::transport("thread creation returned no id"))?
            .to_string();
        let message = serde_json::json!({ "role": "user", "content": self.initial_message });
        cancellable(
            &self.cancel,
            self.client.post(&format!("threads/{}/messages", thread_id), &message),
        )
        .await?;
        tracing::debug!("[HttpExecution] Opened thread {}", thread_id);
        Ok(thread_id)
    }

    async fn wait_for_run(
        &self,
        worker: &WorkerHandle,
        thread_id: &str,
        run_id: &str,
    ) -> Result<(), PipelineError> {
        let path = format!("threads/{}/runs/{}", thread_id, run_id);
        let mut attempts: u32 = 0;
        loop {
            let run = cancellable(&self.cancel, self.client.get(&path)).await?;
            let status = run.get("status").and_then(Value::as_str).unwrap_or("unknown");
            match status {
                "queued" | "in_progress" => {}
                "completed" => return Ok(()),
                other => {
                    let last_error = run
                        .get("last_error")
                        .filter(|e| !e.is_null())
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "none".to_string());
                    tracing::warn!(
                        "[HttpExecution] Run {} for {} ended with status '{}', last_error: {}",
                        run_id,
                        worker.stage,
                        other,
                        last_error
                    );
                    return Err(PipelineError::transport(format!(
                        "Run {} for stage {} ended with status '{}': {}",
                        run_id, worker.stage, other, last_error
                    )));
                }
            }

            attempts += 1;
            if let Some(max) = self.max_poll_attempts {
                if attempts >= max {
                    return Err(PipelineError::transport(format!(
                        "Run {} for stage {} still '{}' after {} polls (timeout)",
                        run_id, worker.stage, status, attempts
                    )));
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, PipelineError> {
        let body = cancellable(
            &self.cancel,
            self.client
                .get(&format!("threads/{}/messages?order=asc", thread_id)),
        )
        .await?;
        Ok(parse_messages(&body))
    }

    async fn drive(&self) -> Result<(), PipelineError> {
        let mut thread_id = self.open_thread().await?;
        let mut turns: Vec<String> = vec![self.initial_message.clone()];

        for (idx, worker) in self.workers.iter().enumerate() {
            if idx > 0 && self.conversation == ConversationMode::Isolated {
                thread_id = self.open_thread().await?;
            }

            tracing::info!(
                "[HttpExecution] Starting {} ({}) on thread {}",
                worker.stage,
                worker.worker_id,
                thread_id
            );
            let body = serde_json::json!({ "assistant_id": worker.worker_id });
            let run = cancellable(
                &self.cancel,
                self.client.post(&format!("threads/{}/runs", thread_id), &body),
            )
            .await?;
            let run_id = run
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| PipelineError::transport("run creation returned no id"))?
                .to_string();

            self.wait_for_run(worker, &thread_id, &run_id).await?;

            let stage_texts: Vec<String> = self
                .list_messages(&thread_id)
                .await?
                .into_iter()
                .filter(|m| m.role == "assistant" && m.run_id.as_deref() == Some(run_id.as_str()))
                .map(|m| m.text)
                .filter(|t| !t.is_empty())
                .collect();
            let stage_text = stage_texts.join("\n");
            turns.extend(stage_texts);

            if self
                .tx
                .send(Ok(StageEvent::update(&worker.stage, stage_text)))
                .await
                .is_err()
            {
                tracing::debug!("[HttpExecution] Listener dropped, stopping run");
                return Ok(());
            }
        }

        let last_stage = self
            .workers
            .last()
            .map(|w| w.stage.clone())
            .unwrap_or_default();
        let payload = Value::Array(turns.into_iter().map(Value::String).collect());
        let _ = self.tx.send(Ok(StageEvent::output(last_stage, payload))).await;
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutionService for HttpExecutionService {
    async fn open_run(
        &self,
        workers: &[WorkerHandle],
        initial_message: &str,
        cancel: CancellationToken,
    ) -> Result<PendingRun, PipelineError> {
        if workers.is_empty() {
            return Err(PipelineError::Internal("run has no workers".to_string()));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (start_tx, start_rx) = oneshot::channel::<()>();

        let execution = Execution {
            client: self.client.clone(),
            poll_interval: self.poll_interval,
            max_poll_attempts: self.max_poll_attempts,
            conversation: self.conversation,
            workers: workers.to_vec(),
            initial_message: initial_message.to_string(),
            cancel,
            tx,
        };
        let pending_id = run_id.clone();
        tokio::spawn(async move {
            if start_rx.await.is_err() {
                tracing::debug!("[HttpExecution] Run {} never started", pending_id);
                return;
            }
            execution.run().await;
        });

        Ok(PendingRun::new(run_id, Box::pin(ReceiverStream::new(rx)), start_tx))
    }
}
