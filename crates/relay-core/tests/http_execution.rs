//! HTTP adapters against a mock agents service.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use relay_core::config::WorkerConfig;
use relay_core::models::StageEvent;
use relay_core::remote::{
    AgentsClient, HttpExecutionService, HttpWorkerDirectory, RemoteExecutionService, WorkerHandle,
};
use relay_core::{PipelineCoordinator, PipelineError, PipelinePlan, RelayConfig};

fn client(server: &MockServer) -> AgentsClient {
    AgentsClient::new(
        server.base_url(),
        Some("test-key".to_string()),
        "2025-05-15-preview",
        Duration::from_secs(5),
    )
}

fn fast_config() -> RelayConfig {
    RelayConfig {
        poll_interval_ms: 10,
        ..RelayConfig::default()
    }
}

async fn mock_thread(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/threads")
                .header("authorization", "Bearer test-key")
                .query_param("api-version", "2025-05-15-preview");
            then.status(200).json_body(json!({"id": "thread_1"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/threads/thread_1/messages");
            then.status(200).json_body(json!({"id": "msg_0"}));
        })
        .await;
}

async fn mock_run(server: &MockServer, assistant: &str, run_id: &str, status: serde_json::Value) {
    let assistant_match = format!("\"assistant_id\":\"{}\"", assistant);
    let run_body = json!({"id": run_id});
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/threads/thread_1/runs")
                .body_contains(assistant_match.as_str());
            then.status(200).json_body(run_body);
        })
        .await;
    let run_path = format!("/threads/thread_1/runs/{}", run_id);
    server
        .mock_async(|when, then| {
            when.method(GET).path(run_path.as_str());
            then.status(200).json_body(status);
        })
        .await;
}

async fn mock_messages(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/threads/thread_1/messages")
                .query_param("order", "asc");
            then.status(200).json_body(json!({
                "data": [
                    {"role": "user", "content": [{"type": "text", "text": {"value": "{\"zone\":\"SE3\"}"}}]},
                    {"role": "assistant", "run_id": "run_a", "content": [{"type": "text", "text": {"value": "{\"prices\":[1,2]}"}}]},
                    {"role": "assistant", "run_id": "run_b", "content": [{"type": "text", "text": {"value": "{\"agent\":\"EmailGenerator\",\"email_to\":[\"ops@example.com\"],\"email_subject\":\"Report\"}"}}]}
                ]
            }));
        })
        .await;
}

fn workers() -> Vec<WorkerHandle> {
    vec![
        WorkerHandle::new("RemoteData", "asst_a"),
        WorkerHandle::new("EmailGenerator", "asst_b"),
    ]
}

#[tokio::test]
async fn test_http_run_streams_updates_then_output() {
    let server = MockServer::start_async().await;
    mock_thread(&server).await;
    mock_run(&server, "asst_a", "run_a", json!({"status": "completed"})).await;
    mock_run(&server, "asst_b", "run_b", json!({"status": "completed"})).await;
    mock_messages(&server).await;

    let service = HttpExecutionService::new(client(&server), &fast_config());
    let pending = service
        .open_run(&workers(), "{\"zone\":\"SE3\"}", CancellationToken::new())
        .await
        .unwrap();
    let events: Vec<_> = pending.start().collect().await;

    assert_eq!(events.len(), 3);
    assert_eq!(
        events[0].as_ref().unwrap(),
        &StageEvent::update("RemoteData", "{\"prices\":[1,2]}")
    );
    assert_eq!(events[1].as_ref().unwrap().stage_id(), "EmailGenerator");
    match events[2].as_ref().unwrap() {
        StageEvent::Output { stage_id, payload } => {
            assert_eq!(stage_id, "EmailGenerator");
            let turns = payload.as_array().unwrap();
            assert_eq!(turns.len(), 3);
            assert_eq!(turns[0], "{\"zone\":\"SE3\"}");
        }
        other => panic!("expected output, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_run_surfaces_last_error() {
    let server = MockServer::start_async().await;
    mock_thread(&server).await;
    mock_run(
        &server,
        "asst_a",
        "run_a",
        json!({"status": "failed", "last_error": {"code": "server_error", "message": "tool returned 502 Bad Gateway"}}),
    )
    .await;

    let service = HttpExecutionService::new(client(&server), &fast_config());
    let pending = service
        .open_run(&workers(), "{}", CancellationToken::new())
        .await
        .unwrap();
    let events: Vec<_> = pending.start().collect().await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        Err(err @ PipelineError::Transport { message, .. }) => {
            assert!(message.contains("failed"));
            assert!(message.contains("502 Bad Gateway"));
            assert!(err.looks_like_downstream_failure());
        }
        other => panic!("expected transport error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_poll_attempt_cap() {
    let server = MockServer::start_async().await;
    mock_thread(&server).await;
    mock_run(&server, "asst_a", "run_a", json!({"status": "in_progress"})).await;

    let config = RelayConfig {
        max_poll_attempts: Some(3),
        ..fast_config()
    };
    let service = HttpExecutionService::new(client(&server), &config);
    let pending = service
        .open_run(&workers(), "{}", CancellationToken::new())
        .await
        .unwrap();
    let events: Vec<_> = pending.start().collect().await;

    match events.last() {
        Some(Err(PipelineError::Transport { message, .. })) => {
            assert!(message.contains("after 3 polls"));
        }
        other => panic!("expected poll cap error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_while_polling() {
    let server = MockServer::start_async().await;
    mock_thread(&server).await;
    mock_run(&server, "asst_a", "run_a", json!({"status": "queued"})).await;

    let cancel = CancellationToken::new();
    let service = HttpExecutionService::new(client(&server), &fast_config());
    let pending = service.open_run(&workers(), "{}", cancel.clone()).await.unwrap();
    let mut events = pending.start();

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let next = events.next().await;
    assert!(matches!(next, Some(Err(PipelineError::Cancelled))));
}

#[tokio::test]
async fn test_coordinator_over_http() {
    let server = MockServer::start_async().await;
    for id in ["asst_a", "asst_b"] {
        let path = format!("/assistants/{}", id);
        server
            .mock_async(|when, then| {
                when.method(GET).path(path.as_str());
                then.status(200).json_body(json!({"id": id}));
            })
            .await;
    }
    mock_thread(&server).await;
    mock_run(&server, "asst_a", "run_a", json!({"status": "completed"})).await;
    mock_run(&server, "asst_b", "run_b", json!({"status": "completed"})).await;
    mock_messages(&server).await;

    let mut config = fast_config();
    config.stages = vec!["RemoteData".to_string(), "EmailGenerator".to_string()];
    config.sender_stage = None;
    for (stage, id) in [("RemoteData", "asst_a"), ("EmailGenerator", "asst_b")] {
        config.workers.insert(
            stage.to_string(),
            WorkerConfig {
                id: Some(id.to_string()),
                ..Default::default()
            },
        );
    }
    let config = Arc::new(config);

    let directory = HttpWorkerDirectory::new(client(&server), config.clone());
    let execution = HttpExecutionService::new(client(&server), &config);
    let coord = PipelineCoordinator::new(Arc::new(directory), Arc::new(execution), config.clone());

    let output = coord
        .run_pipeline(&PipelinePlan::from_config(&config), "{\"zone\":\"SE3\"}")
        .await
        .unwrap();
    let envelope = output.envelope.as_ref().expect("envelope");
    assert_eq!(envelope.email_to(), &["ops@example.com".to_string()]);
    assert_eq!(envelope.subject(), "Report");

    let rendered: serde_json::Value = serde_json::from_str(&output.render()).unwrap();
    assert_eq!(rendered["agent"], "EmailGenerator");
}
