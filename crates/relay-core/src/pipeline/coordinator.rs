//! Pipeline coordinator.
//!
//! Drives one run end to end:
//! 1. Resolve every stage (and the sender) through the worker directory
//! 2. Reject runs where two stages share a remote worker
//! 3. Open the run, then start it once the listener is attached
//! 4. Drain events, keeping the largest fragment per stage
//! 5. Once the milestone stage completes, recover and normalize the
//!    envelope from the stage texts so far and hand it to the sender
//!    sub-pipeline before draining further
//! 6. Render the final JSON

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use super::capture::RunCapture;
use crate::artifacts::ArtifactWriter;
use crate::config::RelayConfig;
use crate::dispatch;
use crate::envelope::{extract_candidates, normalize, sanitize_json_text};
use crate::error::PipelineError;
use crate::models::{
    select_final_text, CanonicalDispatchEnvelope, PipelineRequest, RecoveredCandidate, ShapeTag,
    StageEvent,
};
use crate::remote::{RemoteExecutionService, StageEventStream, WorkerDirectory, WorkerHandle};

/// Which stages run, which one carries the envelope, and who sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePlan {
    pub stages: Vec<String>,
    pub milestone: Option<String>,
    pub sender: Option<String>,
}

impl PipelinePlan {
    pub fn new<I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stages: stages.into_iter().map(Into::into).collect(),
            milestone: None,
            sender: None,
        }
    }

    pub fn with_milestone(mut self, milestone: impl Into<String>) -> Self {
        self.milestone = Some(milestone.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            stages: config.stages.clone(),
            milestone: config.milestone_stage.clone(),
            sender: config.sender_stage.clone(),
        }
    }
}

/// What happened to the dispatch envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchReport {
    /// No sender in the plan or the milestone never produced output.
    NotRequested,
    SkippedDryRun,
    SkippedExtractionFailure,
    Sent {
        run_id: String,
        response: Option<String>,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run_id: String,
    pub final_text: Option<String>,
    pub envelope: Option<CanonicalDispatchEnvelope>,
    /// `{ "raw": ... }` when the milestone output held no recoverable JSON.
    pub extraction_fallback: Option<Value>,
    pub dispatch: DispatchReport,
    pub stage_texts: BTreeMap<String, String>,
}

impl PipelineOutput {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            final_text: None,
            envelope: None,
            extraction_fallback: None,
            dispatch: DispatchReport::NotRequested,
            stage_texts: BTreeMap::new(),
        }
    }

    /// The caller-facing JSON string.
    ///
    /// JSON final text is returned verbatim; other text is wrapped as
    /// `{runId, result}`; a run without output yields `{runId, message}`.
    pub fn render(&self) -> String {
        let text = match self.final_text.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => {
                return serde_json::json!({
                    "runId": self.run_id,
                    "message": "no executor output captured",
                })
                .to_string()
            }
        };
        match serde_json::from_str::<Value>(text) {
            Ok(v) if v.is_object() || v.is_array() => text.to_string(),
            _ => serde_json::json!({ "runId": self.run_id, "result": text }).to_string(),
        }
    }
}

/// A failed run, with the run id when execution had already begun.
#[derive(Debug)]
struct RunFailure {
    run_id: Option<String>,
    error: PipelineError,
}

impl RunFailure {
    fn before_run(error: PipelineError) -> Self {
        Self {
            run_id: None,
            error,
        }
    }

    fn during(run_id: &str, error: PipelineError) -> Self {
        Self {
            run_id: Some(run_id.to_string()),
            error,
        }
    }
}

pub struct PipelineCoordinator {
    directory: Arc<dyn WorkerDirectory>,
    execution: Arc<dyn RemoteExecutionService>,
    config: Arc<RelayConfig>,
    artifacts: Option<ArtifactWriter>,
    cancel: CancellationToken,
}

impl PipelineCoordinator {
    pub fn new(
        directory: Arc<dyn WorkerDirectory>,
        execution: Arc<dyn RemoteExecutionService>,
        config: Arc<RelayConfig>,
    ) -> Self {
        let artifacts = config.artifact_dir.as_ref().map(ArtifactWriter::new);
        Self {
            directory,
            execution,
            config,
            artifacts,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` for every remote call. Cancelling it abandons local
    /// waits; remote runs keep going.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run the default pipeline for one request. Always returns JSON.
    pub async fn run_async(&self, zone: &str, city: &str, date: &str, user_request_text: &str) -> String {
        let decision = dispatch::evaluate(user_request_text);
        let request = PipelineRequest::new(
            uuid::Uuid::new_v4().to_string(),
            zone,
            city,
            date,
            user_request_text,
            decision,
        );
        tracing::info!(
            "[Pipeline] Request {} for {}/{} on {} (email requested: {}, recipients: {})",
            request.task_id(),
            request.zone(),
            request.city(),
            request.date(),
            request.email_requested(),
            request.recipients().len()
        );

        let mut plan = PipelinePlan::from_config(&self.config);
        if !request.email_requested() {
            plan.sender = None;
        }

        match self.execute(&plan, &request.initial_message()).await {
            Ok(output) => output.render(),
            Err(failure) => {
                let run_id = failure.run_id.unwrap_or_else(|| request.task_id().to_string());
                tracing::error!("[Pipeline] Run {} failed: {}", run_id, failure.error);
                failure.error.to_json(&run_id).to_string()
            }
        }
    }

    pub async fn run_pipeline(
        &self,
        plan: &PipelinePlan,
        initial_message: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        self.execute(plan, initial_message)
            .await
            .map_err(|failure| failure.error)
    }

    async fn resolve(&self, name: &str) -> Result<WorkerHandle, PipelineError> {
        self.directory.get_or_create_worker(name).await.map_err(|e| {
            tracing::error!("[Pipeline] Failed to obtain or create {} agent: {}", name, e);
            match e {
                PipelineError::Provisioning { .. } => e,
                other => PipelineError::Provisioning {
                    stage: name.to_string(),
                    reason: other.to_string(),
                },
            }
        })
    }

    async fn execute(
        &self,
        plan: &PipelinePlan,
        initial_message: &str,
    ) -> Result<PipelineOutput, RunFailure> {
        if plan.stages.is_empty() {
            return Err(RunFailure::before_run(PipelineError::Config(
                "pipeline has no stages".to_string(),
            )));
        }

        let mut workers = Vec::with_capacity(plan.stages.len());
        for stage in &plan.stages {
            workers.push(self.resolve(stage).await.map_err(RunFailure::before_run)?);
        }
        let sender = match &plan.sender {
            Some(name) => Some(self.resolve(name).await.map_err(RunFailure::before_run)?),
            None => None,
        };
        check_identities(workers.iter().chain(sender.iter())).map_err(RunFailure::before_run)?;

        let pending = self
            .execution
            .open_run(&workers, initial_message, self.cancel.child_token())
            .await
            .map_err(RunFailure::before_run)?;
        let run_id = pending.run_id().to_string();
        tracing::info!("[Pipeline] Run {} started with {} stages", run_id, workers.len());
        let mut events = pending.start();

        let mut capture = RunCapture::new();
        let mut output = PipelineOutput::new(run_id.clone());
        let milestone = plan
            .milestone
            .as_deref()
            .filter(|m| plan.stages.iter().any(|s| s == m));
        let mut milestone_pending = milestone.is_some();

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(RunFailure::during(&run_id, PipelineError::Cancelled));
                }
                next = events.next() => next,
            };

            match next {
                None => {
                    tracing::warn!("[Pipeline] Run {} ended without output", run_id);
                    break;
                }
                Some(Ok(StageEvent::Update { stage_id, text })) => {
                    // The milestone stage is complete once a later stage reports.
                    if milestone_pending
                        && capture.active_stage() == milestone
                        && milestone != Some(stage_id.as_str())
                    {
                        milestone_pending = false;
                        let milestone_text =
                            milestone_turns(plan, &capture).unwrap_or_default();
                        self.handle_milestone(&milestone_text, sender.as_ref(), &mut output)
                            .await
                            .map_err(|e| RunFailure::during(&run_id, e))?;
                    }
                    capture.record_update(&stage_id, &text);
                }
                Some(Ok(StageEvent::Output { stage_id, payload })) => {
                    tracing::info!("[Pipeline] Output from {}", stage_id);
                    let payload = without_seed(payload, initial_message);
                    if milestone_pending {
                        let milestone_text = milestone_turns(plan, &capture)
                            .or_else(|| payload_text(&payload))
                            .unwrap_or_default();
                        self.handle_milestone(&milestone_text, sender.as_ref(), &mut output)
                            .await
                            .map_err(|e| RunFailure::during(&run_id, e))?;
                    }
                    output.final_text = select_final_text(&payload)
                        .filter(|t| !t.trim().is_empty())
                        .or_else(|| capture.largest(&stage_id).map(str::to_string));
                    break;
                }
                Some(Err(PipelineError::Cancelled)) => {
                    return Err(RunFailure::during(&run_id, PipelineError::Cancelled));
                }
                Some(Err(e)) => {
                    log_remediation_hint(&e);
                    return Err(RunFailure::during(
                        &run_id,
                        PipelineError::Incomplete {
                            reason: e.to_string(),
                            partial: capture.into_fragments(),
                        },
                    ));
                }
            }
        }

        output.stage_texts = capture.into_fragments();
        Ok(output)
    }

    async fn handle_milestone(
        &self,
        text: &str,
        sender: Option<&WorkerHandle>,
        output: &mut PipelineOutput,
    ) -> Result<(), PipelineError> {
        if let Some(writer) = &self.artifacts {
            writer.save_last_output_safe(text).await;
        }

        let markers = self.config.shape_markers();
        let candidates: Vec<RecoveredCandidate> = extract_candidates(text, &markers).collect();
        let tagged = candidates.iter().any(|c| c.shape != ShapeTag::Unknown);
        let envelope = match normalize(candidates, self.config.inline_threshold_bytes) {
            Some(envelope) if tagged => envelope,
            _ => {
                tracing::warn!(
                    "[Pipeline] No email or energy JSON recoverable from milestone output; skipping dispatch"
                );
                output.extraction_fallback = Some(serde_json::json!({ "raw": sanitize_json_text(text) }));
                if sender.is_some() {
                    output.dispatch = DispatchReport::SkippedExtractionFailure;
                }
                return Ok(());
            }
        };

        tracing::info!(
            "[Pipeline] Envelope: {} recipients, {} attachments",
            envelope.email_to().len(),
            envelope.attachments().len()
        );
        let message = envelope.to_json().to_string();
        output.envelope = Some(envelope);

        let Some(sender) = sender else {
            return Ok(());
        };
        if self.config.dry_run {
            tracing::info!("[Pipeline] Dry run, not sending envelope: {}", message);
            output.dispatch = DispatchReport::SkippedDryRun;
            return Ok(());
        }

        output.dispatch = match self.run_sender(sender, &message).await {
            Ok((run_id, response)) => {
                tracing::info!("[Pipeline] Dispatch run {} completed", run_id);
                DispatchReport::Sent { run_id, response }
            }
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                tracing::warn!("[Pipeline] Dispatch via {} failed: {}", sender.stage, e);
                log_remediation_hint(&e);
                DispatchReport::Failed {
                    message: e.to_string(),
                }
            }
        };
        Ok(())
    }

    /// Single-stage sub-pipeline seeded with the serialized envelope.
    async fn run_sender(
        &self,
        sender: &WorkerHandle,
        message: &str,
    ) -> Result<(String, Option<String>), PipelineError> {
        let pending = self
            .execution
            .open_run(std::slice::from_ref(sender), message, self.cancel.child_token())
            .await?;
        let run_id = pending.run_id().to_string();
        let events = pending.start();
        let response = self.collect_single(events, &sender.stage).await?;
        Ok((run_id, response))
    }

    async fn collect_single(
        &self,
        mut events: StageEventStream,
        stage: &str,
    ) -> Result<Option<String>, PipelineError> {
        let mut capture = RunCapture::new();
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                next = events.next() => next,
            };
            match next {
                None => return Ok(capture.largest(stage).map(str::to_string)),
                Some(Ok(StageEvent::Update { stage_id, text })) => {
                    capture.record_update(&stage_id, &text)
                }
                Some(Ok(StageEvent::Output { payload, .. })) => {
                    return Ok(select_final_text(&payload)
                        .or_else(|| capture.largest(stage).map(str::to_string)));
                }
                Some(Err(e)) => return Err(e),
            }
        }
    }
}

/// Stage texts from the first stage through the milestone, as a JSON array
/// of turns. Later stages and the seeded request are never included.
fn milestone_turns(plan: &PipelinePlan, capture: &RunCapture) -> Option<String> {
    let milestone = plan.milestone.as_deref()?;
    let end = plan.stages.iter().position(|s| s == milestone)?;
    let turns: Vec<Value> = plan.stages[..=end]
        .iter()
        .filter_map(|stage| capture.largest(stage))
        .map(|text| Value::String(text.to_string()))
        .collect();
    if turns.is_empty() {
        return None;
    }
    Some(Value::Array(turns).to_string())
}

/// Drop the leading turn when it is the run's own initial message.
fn without_seed(payload: Value, initial_message: &str) -> Value {
    match payload {
        Value::Array(mut turns) => {
            let seeded = turns
                .first()
                .and_then(|t| t.as_str().or_else(|| t.get("content").and_then(Value::as_str)))
                == Some(initial_message);
            if seeded {
                turns.remove(0);
            }
            if turns.is_empty() {
                Value::Null
            } else {
                Value::Array(turns)
            }
        }
        other => other,
    }
}

/// Text handed to recovery when no stage text was captured: whole turn
/// arrays so that every stage's JSON is visible, strings as-is.
fn payload_text(payload: &Value) -> Option<String> {
    match payload {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn check_identities<'a>(
    workers: impl Iterator<Item = &'a WorkerHandle>,
) -> Result<(), PipelineError> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for worker in workers {
        if let Some(first) = seen.insert(&worker.worker_id, &worker.stage) {
            tracing::error!(
                "[Pipeline] Stages {} and {} share worker {}",
                first,
                worker.stage,
                worker.worker_id
            );
            return Err(PipelineError::DuplicateIdentity {
                first: first.to_string(),
                second: worker.stage.clone(),
                worker_id: worker.worker_id.clone(),
            });
        }
    }
    Ok(())
}

fn log_remediation_hint(error: &PipelineError) {
    if error.looks_like_downstream_failure() {
        tracing::warn!(
            "[Pipeline] The failure looks like an HTTP/transport problem in a downstream tool. \
             Check that the data tool endpoint is reachable from the agents service and that \
             its gateway is not timing out."
        );
    }
}
