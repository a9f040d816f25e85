//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses the
//! relay-core pipeline, recovery and gate logic.

pub mod config;
pub mod demo;
pub mod extract;
pub mod gate;
pub mod normalize;
pub mod run;

use std::io::Read;
use std::path::Path;

use relay_core::RelayConfig;

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Read command input from a file path, or from stdin when the path is `-`.
pub fn read_input(source: &str) -> Result<String, String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("Failed to read stdin: {}", e))?;
        return Ok(buf);
    }
    std::fs::read_to_string(source).map_err(|e| format!("Failed to read '{}': {}", source, e))
}

/// Resolve configuration the way every command does: dotenv files first,
/// then the explicit or discovered YAML file.
pub fn load_config(path: Option<&str>) -> Result<RelayConfig, String> {
    load_dotenv();
    RelayConfig::load(path.map(Path::new)).map_err(|e| e.to_string())
}

/// Load .env and .env.local files for environment variables.
///
/// Variables already present in the process environment win.
pub fn load_dotenv() {
    // Try .env.local first (higher priority), then .env
    for filename in &[".env.local", ".env"] {
        let path = Path::new(filename);
        if !path.exists() {
            continue;
        }
        if let Ok(content) = std::fs::read_to_string(path) {
            for (key, value) in parse_dotenv(&content) {
                if std::env::var(&key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

/// Parse `KEY=VALUE` lines, skipping blanks and `#` comments.
pub fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some(eq_idx) = line.find('=') {
            let key = line[..eq_idx].trim();
            if key.is_empty() {
                continue;
            }
            let mut value = line[eq_idx + 1..].trim();
            // Strip surrounding quotes
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            pairs.push((key.to_string(), value.to_string()));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotenv_lines() {
        let pairs = parse_dotenv(
            "# comment\nPROJECT_ENDPOINT=https://agents.example\nexport PROJECT_API_KEY=\"secret\"\n\nBROKEN\nEMPTY=\nQUOTED='a b'\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("PROJECT_ENDPOINT".to_string(), "https://agents.example".to_string()),
                ("PROJECT_API_KEY".to_string(), "secret".to_string()),
                ("EMPTY".to_string(), String::new()),
                ("QUOTED".to_string(), "a b".to_string()),
            ]
        );
    }

    #[test]
    fn read_input_reports_missing_file() {
        let err = read_input("/definitely/not/here.txt").unwrap_err();
        assert!(err.contains("Failed to read"));
    }
}
