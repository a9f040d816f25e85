//! Relay configuration.
//!
//! Loaded from YAML with `${VAR}` / `${VAR:-default}` expansion:
//!
//! ```yaml
//! endpoint: "${PROJECT_ENDPOINT:-http://localhost:3000}"
//! api_key: "${PROJECT_API_KEY:-}"
//! model: "${MODEL_DEPLOYMENT_NAME:-}"
//! inline_threshold_bytes: 307200
//! conversation: shared
//! stages: [RemoteData, Energy, EmailGenerator]
//! milestone_stage: EmailGenerator
//! sender_stage: EmailAssistant
//! workers:
//!   RemoteData:
//!     id: "${REMOTE_DATA_AGENT_ID:-}"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::envelope::{ShapeMarkers, DEFAULT_INLINE_THRESHOLD_BYTES};
use crate::error::PipelineError;

pub const CONFIG_FILE_NAME: &str = "relay.yaml";

/// How stages share conversation context on the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    /// All stages append to one thread.
    #[default]
    Shared,
    /// Each stage gets a fresh thread seeded with the initial message.
    Isolated,
}

/// Per-stage worker settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Known remote worker id. Empty means "create on demand".
    #[serde(default)]
    pub id: Option<String>,

    /// Model deployment used when the worker must be created.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Fallback model for workers without their own `model`.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_inline_threshold")]
    pub inline_threshold_bytes: u64,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub max_poll_attempts: Option<u32>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub conversation: ConversationMode,

    #[serde(default = "default_stages")]
    pub stages: Vec<String>,

    #[serde(default = "default_milestone_stage")]
    pub milestone_stage: Option<String>,

    #[serde(default = "default_sender_stage")]
    pub sender_stage: Option<String>,

    #[serde(default = "default_energy_agent")]
    pub energy_agent: String,

    #[serde(default = "default_email_agent")]
    pub email_agent: String,

    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,

    /// Markdown file with `# <Name> Agent Instructions` sections, used for
    /// workers without inline `instructions`.
    #[serde(default)]
    pub instructions_file: Option<PathBuf>,

    #[serde(default)]
    pub workers: HashMap<String, WorkerConfig>,
}

fn default_endpoint() -> String {
    "http://localhost:3000".to_string()
}

fn default_api_version() -> String {
    "2025-05-15-preview".to_string()
}

fn default_inline_threshold() -> u64 {
    DEFAULT_INLINE_THRESHOLD_BYTES
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_stages() -> Vec<String> {
    vec![
        "RemoteData".to_string(),
        "Energy".to_string(),
        "EmailGenerator".to_string(),
    ]
}

fn default_milestone_stage() -> Option<String> {
    Some("EmailGenerator".to_string())
}

fn default_sender_stage() -> Option<String> {
    Some("EmailAssistant".to_string())
}

fn default_energy_agent() -> String {
    "Energy".to_string()
}

fn default_email_agent() -> String {
    "EmailGenerator".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_version: default_api_version(),
            api_key: None,
            model: None,
            inline_threshold_bytes: default_inline_threshold(),
            dry_run: false,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: None,
            request_timeout_secs: default_request_timeout_secs(),
            conversation: ConversationMode::default(),
            stages: default_stages(),
            milestone_stage: default_milestone_stage(),
            sender_stage: default_sender_stage(),
            energy_agent: default_energy_agent(),
            email_agent: default_email_agent(),
            artifact_dir: None,
            instructions_file: None,
            workers: HashMap::new(),
        }
    }
}

impl RelayConfig {
    /// Parse YAML after expanding environment references.
    pub fn from_yaml(yaml: &str) -> Result<Self, PipelineError> {
        let expanded = resolve_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| PipelineError::Config(format!("Failed to parse relay YAML: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Resolve configuration: explicit path, then `./relay.yaml`, then the
    /// user config dir, then defaults. Environment overrides apply last and
    /// the result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self, PipelineError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::discover() {
                Some(path) => {
                    tracing::info!("[Config] Using {}", path.display());
                    Self::from_file(&path)?
                }
                None => {
                    tracing::debug!("[Config] No {} found, using defaults", CONFIG_FILE_NAME);
                    Self::default()
                }
            },
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("relay").join(CONFIG_FILE_NAME))
            .filter(|path| path.is_file())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("RELAY_DRY_RUN") {
            self.dry_run = matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Ok(value) = std::env::var("RELAY_INLINE_THRESHOLD_BYTES") {
            match value.trim().parse::<u64>() {
                Ok(bytes) => self.inline_threshold_bytes = bytes,
                Err(_) => tracing::warn!(
                    "[Config] Ignoring RELAY_INLINE_THRESHOLD_BYTES='{}': not a byte count",
                    value
                ),
            }
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineError::Config("stages must not be empty".to_string()));
        }
        if let Some(milestone) = &self.milestone_stage {
            if !self.stages.contains(milestone) {
                return Err(PipelineError::Config(format!(
                    "milestone_stage '{}' is not one of the stages",
                    milestone
                )));
            }
        }
        if let Some(sender) = &self.sender_stage {
            if self.stages.contains(sender) {
                return Err(PipelineError::Config(format!(
                    "sender_stage '{}' must not be one of the stages",
                    sender
                )));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(PipelineError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shape_markers(&self) -> ShapeMarkers {
        ShapeMarkers {
            email_agent: self.email_agent.clone(),
            energy_agent: self.energy_agent.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Configured worker id for a stage. Falls back to `<NAME>_AGENT_ID`
    /// in the environment. Empty ids count as absent.
    pub fn worker_id(&self, stage: &str) -> Option<String> {
        self.workers
            .get(stage)
            .and_then(|w| w.id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| {
                std::env::var(agent_id_env_key(stage))
                    .ok()
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty())
            })
    }

    pub fn worker_model(&self, stage: &str) -> Option<String> {
        self.workers
            .get(stage)
            .and_then(|w| w.model.clone())
            .or_else(|| self.model.clone())
            .filter(|m| !m.trim().is_empty())
    }

    /// Inline instructions, else the stage's section of `instructions_file`.
    pub fn worker_instructions(&self, stage: &str) -> String {
        if let Some(text) = self.workers.get(stage).and_then(|w| w.instructions.clone()) {
            return text;
        }
        let Some(path) = &self.instructions_file else {
            return String::new();
        };
        match std::fs::read_to_string(path) {
            Ok(text) => instruction_section(&text, stage),
            Err(e) => {
                tracing::warn!(
                    "[Config] Failed to read instructions file '{}': {}",
                    path.display(),
                    e
                );
                String::new()
            }
        }
    }
}

/// `RemoteData` → `REMOTEDATA_AGENT_ID`.
pub fn agent_id_env_key(stage: &str) -> String {
    format!("{}_AGENT_ID", stage.to_uppercase())
}

/// Extract the `# <stage> Agent Instructions` section of a markdown file,
/// up to the next `---` rule or top-level header. Without a matching
/// header the whole text is returned.
pub fn instruction_section(text: &str, stage: &str) -> String {
    let header = format!("# {} agent instructions", stage.to_lowercase());
    let mut lines = text.lines();
    if !lines.by_ref().any(|line| line.trim().to_lowercase().starts_with(&header)) {
        return text.to_string();
    }
    lines
        .take_while(|line| !line.starts_with("---") && !line.starts_with("# "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Resolve `${VAR}` and `${VAR:-default}` references. Unset variables
/// without a default are left as-is.
pub fn resolve_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_REF: regex::Regex =
            regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env reference regex");
    }
    ENV_REF
        .replace_all(input, |caps: &regex::Captures| {
            let var_expr = &caps[1];
            if let Some(idx) = var_expr.find(":-") {
                let var_name = &var_expr[..idx];
                let default_val = &var_expr[idx + 2..];
                std::env::var(var_name).unwrap_or_else(|_| default_val.to_string())
            } else {
                std::env::var(var_expr).unwrap_or_else(|_| format!("${{{}}}", var_expr))
            }
        })
        .to_string()
}
