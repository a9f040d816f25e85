//! `relay run` — Run the pipeline against the hosted agents service.

use std::sync::Arc;

use relay_core::remote::{AgentsClient, HttpExecutionService, HttpWorkerDirectory};
use relay_core::{PipelineCoordinator, RelayConfig};

/// Per-invocation overrides from the command line.
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub dry_run: bool,
    pub inline_threshold: Option<u64>,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut RelayConfig) {
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(bytes) = self.inline_threshold {
            config.inline_threshold_bytes = bytes;
        }
    }
}

pub fn http_coordinator(config: RelayConfig) -> PipelineCoordinator {
    let config = Arc::new(config);
    let client = AgentsClient::from_config(&config);
    let directory = HttpWorkerDirectory::new(client.clone(), config.clone());
    let execution = HttpExecutionService::new(client, &config);
    PipelineCoordinator::new(Arc::new(directory), Arc::new(execution), config)
}

/// Run one request and print the resulting JSON. Ctrl-C abandons the run.
pub async fn execute(
    coordinator: &PipelineCoordinator,
    zone: &str,
    city: &str,
    date: &str,
    request: &str,
) -> serde_json::Value {
    let token = coordinator.cancellation_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("[CLI] Interrupt received, cancelling run");
            token.cancel();
        }
    });

    let result = coordinator.run_async(zone, city, date, request).await;
    watcher.abort();

    serde_json::from_str(&result).unwrap_or(serde_json::Value::String(result))
}

pub async fn run(
    config_path: Option<&str>,
    overrides: &RunOverrides,
    zone: &str,
    city: &str,
    date: &str,
    request: &str,
) -> Result<(), String> {
    let mut config = super::load_config(config_path)?;
    overrides.apply(&mut config);

    println!("🚀 Running {} stage(s) against {}", config.stages.len(), config.endpoint);
    if config.dry_run {
        println!("   dry run: the envelope is logged, not sent");
    }

    let coordinator = http_coordinator(config);
    let output = execute(&coordinator, zone, city, date, request).await;
    super::print_json(&output);

    if output.get("error").is_some() {
        return Err("Pipeline failed before execution".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_only_touch_what_was_given() {
        let mut config = RelayConfig::default();
        let before = config.inline_threshold_bytes;
        RunOverrides::default().apply(&mut config);
        assert!(!config.dry_run);
        assert_eq!(config.inline_threshold_bytes, before);

        RunOverrides {
            dry_run: true,
            inline_threshold: Some(10),
        }
        .apply(&mut config);
        assert!(config.dry_run);
        assert_eq!(config.inline_threshold_bytes, 10);
    }
}
