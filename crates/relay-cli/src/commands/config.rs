//! `relay config` — Inspect the resolved configuration.

use relay_core::RelayConfig;

/// Summary printed after validation. Secrets are never echoed.
pub fn summary_json(config: &RelayConfig) -> serde_json::Value {
    let workers: serde_json::Map<String, serde_json::Value> = config
        .stages
        .iter()
        .chain(config.sender_stage.iter())
        .map(|stage| {
            (
                stage.clone(),
                serde_json::json!({
                    "id": config.worker_id(stage),
                    "model": config.worker_model(stage),
                }),
            )
        })
        .collect();

    serde_json::json!({
        "endpoint": config.endpoint,
        "apiVersion": config.api_version,
        "apiKeySet": config.api_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false),
        "stages": config.stages,
        "milestoneStage": config.milestone_stage,
        "senderStage": config.sender_stage,
        "conversation": config.conversation,
        "dryRun": config.dry_run,
        "inlineThresholdBytes": config.inline_threshold_bytes,
        "workers": workers,
    })
}

/// Load and validate configuration without running anything.
pub fn validate(config_path: Option<&str>) -> Result<(), String> {
    let config = super::load_config(config_path)?;
    println!("✅ Configuration is valid");
    super::print_json(&summary_json(&config));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_hides_key_and_lists_sender() {
        let mut config = RelayConfig::default();
        config.api_key = Some("secret".to_string());
        let json = summary_json(&config);
        assert_eq!(json["apiKeySet"], true);
        assert!(!json.to_string().contains("secret"));
        assert!(json["workers"].get("EmailAssistant").is_some());
        assert_eq!(json["conversation"], "shared");
    }
}
