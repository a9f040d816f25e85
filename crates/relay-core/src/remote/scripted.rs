//! In-process execution service with scripted workers.
//!
//! Each worker is a list of text chunks. Chunks are published as `Update`
//! events that resend everything the stage has produced so far, the same
//! way the hosted service streams. Events go out on a broadcast channel, so
//! anything published before a listener subscribes is lost.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use super::{PendingRun, RemoteExecutionService, StageEventStream, WorkerHandle};
use crate::error::PipelineError;
use crate::models::StageEvent;

const CHANNEL_CAPACITY: usize = 256;

type EventResult = Result<StageEvent, PipelineError>;

#[derive(Debug, Default)]
pub struct ScriptedExecutionService {
    scripts: HashMap<String, Vec<String>>,
    failures: HashMap<String, PipelineError>,
    output_override: Option<Value>,
    step_delay: Option<Duration>,
    open_calls: AtomicUsize,
    initial_messages: Arc<Mutex<Vec<String>>>,
}

impl ScriptedExecutionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the chunks a worker streams, keyed by worker id.
    pub fn script<I, S>(mut self, worker_id: impl Into<String>, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripts
            .insert(worker_id.into(), chunks.into_iter().map(Into::into).collect());
        self
    }

    /// Fail the run with `error` once the worker has streamed its chunks.
    pub fn fail_after(mut self, worker_id: impl Into<String>, error: PipelineError) -> Self {
        self.failures.insert(worker_id.into(), error);
        self
    }

    /// Replace the terminal payload (by default the array of text turns).
    pub fn with_output(mut self, payload: Value) -> Self {
        self.output_override = Some(payload);
        self
    }

    /// Pause between published events.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    pub fn open_run_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Initial messages of every opened run, in order.
    pub fn initial_messages(&self) -> Vec<String> {
        self.initial_messages
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// The full event sequence a run over `workers` publishes.
    fn plan_events(&self, workers: &[WorkerHandle], initial_message: &str) -> Vec<EventResult> {
        let mut events = Vec::new();
        let mut turns = vec![Value::String(initial_message.to_string())];

        for worker in workers {
            let mut accumulated = String::new();
            for chunk in self.scripts.get(&worker.worker_id).into_iter().flatten() {
                accumulated.push_str(chunk);
                events.push(Ok(StageEvent::update(&worker.stage, accumulated.clone())));
            }
            turns.push(Value::String(accumulated));
            if let Some(error) = self.failures.get(&worker.worker_id) {
                events.push(Err(error.clone()));
                return events;
            }
        }

        let last_stage = workers.last().map(|w| w.stage.clone()).unwrap_or_default();
        let payload = self
            .output_override
            .clone()
            .unwrap_or(Value::Array(turns));
        events.push(Ok(StageEvent::output(last_stage, payload)));
        events
    }
}

#[async_trait]
impl RemoteExecutionService for ScriptedExecutionService {
    async fn open_run(
        &self,
        workers: &[WorkerHandle],
        initial_message: &str,
        cancel: CancellationToken,
    ) -> Result<PendingRun, PipelineError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.initial_messages.lock() {
            guard.push(initial_message.to_string());
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let planned = self.plan_events(workers, initial_message);
        let step_delay = self.step_delay;

        let (tx, mut rx) = broadcast::channel::<EventResult>(CHANNEL_CAPACITY);
        let (start_tx, start_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            if start_rx.await.is_err() {
                return;
            }
            for event in planned {
                if let Some(delay) = step_delay {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if cancel.is_cancelled() {
                    let _ = tx.send(Err(PipelineError::Cancelled));
                    return;
                }
                // No receiver means nobody is listening; the event is lost.
                let _ = tx.send(event);
            }
        });

        let events: StageEventStream = Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let terminal = event.is_err();
                        yield event;
                        if terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Err(PipelineError::transport(format!("listener lagged by {} events", n)));
                        break;
                    }
                }
            }
        });

        Ok(PendingRun::new(run_id, events, start_tx))
    }
}
