//! `relay demo` — Run the pipeline against scripted in-process workers.
//!
//! Useful for checking configuration, logging and recovery behaviour
//! without credentials for the hosted service.

use std::sync::Arc;

use relay_core::remote::{ScriptedExecutionService, StaticWorkerDirectory};
use relay_core::{dispatch, PipelineCoordinator, RelayConfig};

const DEMO_ZONE: &str = "SE3";
const DEMO_CITY: &str = "Stockholm";

fn demo_worker_id(stage: &str) -> String {
    format!("demo-{}", stage.to_lowercase())
}

/// Scripted replies for the configured stages. Unknown stages answer with a
/// short acknowledgement so any stage list can be demoed.
fn scripted_reply(stage: &str, config: &RelayConfig, recipients: &[String]) -> Vec<String> {
    if stage == config.email_agent {
        let to = if recipients.is_empty() {
            vec!["ops@example.com".to_string()]
        } else {
            recipients.to_vec()
        };
        let email = serde_json::json!({
            "agent": config.email_agent,
            "email_to": to,
            "email_subject": format!("Energy summary for {}", DEMO_CITY),
            "email_body_markdown": "## Summary\nShifting load to off-peak hours saves 18 kWh.",
            "attachments": [{
                "filename": "savings.csv",
                "content_type": "text/csv",
                "content_base64": "aG91cixrd2gKMSwzCg=="
            }]
        });
        return vec![email.to_string()];
    }
    if stage == config.energy_agent {
        let energy = serde_json::json!({
            "agent": config.energy_agent,
            "baseline_kwh": 120,
            "optimized_kwh": 102,
            "savings_kwh": 18
        });
        return vec![
            "Baseline analysis follows.\n".to_string(),
            format!("```json\n{}\n```", energy),
        ];
    }
    if config.sender_stage.as_deref() == Some(stage) {
        return vec![serde_json::json!({ "status": "queued", "provider": "demo" }).to_string()];
    }
    vec![format!(
        "{{\"stage\":\"{}\",\"zone\":\"{}\",\"prices\":[0.42,0.38,0.51]}}",
        stage, DEMO_ZONE
    )]
}

pub fn demo_coordinator(config: RelayConfig, request: &str) -> PipelineCoordinator {
    let decision = dispatch::evaluate(request);
    let mut directory = StaticWorkerDirectory::new();
    let mut service = ScriptedExecutionService::new();

    for stage in config.stages.iter().chain(config.sender_stage.iter()) {
        let worker_id = demo_worker_id(stage);
        directory = directory.with_worker(stage.clone(), worker_id.clone());
        service = service.script(worker_id, scripted_reply(stage, &config, &decision.recipients));
    }

    PipelineCoordinator::new(Arc::new(directory), Arc::new(service), Arc::new(config))
}

pub async fn run(request: &str, dry_run: bool) -> Result<(), String> {
    let config = RelayConfig {
        dry_run,
        ..RelayConfig::default()
    };
    config.validate().map_err(|e| e.to_string())?;

    println!("🧪 Demo run over {} scripted stage(s)", config.stages.len());
    let coordinator = demo_coordinator(config, request);
    let output = super::run::execute(&coordinator, DEMO_ZONE, DEMO_CITY, "today", request).await;
    super::print_json(&output);
    Ok(())
}
