use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tool-specific flag sets that imply root privileges when present in a
/// command, e.g. nmap raw-socket scans. Configuration data, not a hardcoded
/// contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivilegedFlags {
    pub tool: String,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub output_dir: PathBuf,
    pub models: Vec<String>,
    pub noise_patterns: Vec<String>,
    pub privileged_flags: Vec<PrivilegedFlags>,
}

/// Per-batch session snapshot. Built by the front end, read-only inside the
/// execution core: the orchestrator never mutates it mid-batch.
#[derive(Debug, Clone)]
pub struct Session {
    pub target: String,
    pub verbose: bool,
    pub explain: bool,
    pub has_root: bool,
    pub output_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".penpilot").join("output")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            models: vec![
                "mistralai/mistral-7b-instruct".to_string(),
                "anthropic/claude-instant-1.2".to_string(),
                "nousresearch/nous-hermes-2-mixtral-8x7b-sft".to_string(),
                "openai/gpt-3.5-turbo".to_string(),
                "google/gemini-pro".to_string(),
            ],
            noise_patterns: vec![
                r"Starting Nmap \d+\.\d+".to_string(),
                r"Nmap done: \d+ IP addresses".to_string(),
                r"Warning: Hostname".to_string(),
                r"For more information, see".to_string(),
                r"Running: Nmap".to_string(),
                r"Read data files from:".to_string(),
                r"Service scan Timing:".to_string(),
                r"Latency:".to_string(),
                r"Not shown:".to_string(),
                r"WARNING: No targets specified".to_string(),
                r"QUITTING!".to_string(),
                r"You are not required to provide consent".to_string(),
                r"Connection reset by peer".to_string(),
                r"seconds, finished".to_string(),
                r"To use the Nmap Scripting Engine, specify".to_string(),
                r"NOTE: the rDNS lookup will also resolve PTR records".to_string(),
            ],
            privileged_flags: vec![PrivilegedFlags {
                tool: "nmap".to_string(),
                flags: vec!["-sS".to_string(), "-O".to_string(), "-sV".to_string()],
            }],
        }
    }
}

impl Config {
    pub fn load(path: &PathBuf) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        Ok(config)
    }

    #[allow(dead_code)]
    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.models, config.models);
        assert_eq!(parsed.noise_patterns, config.noise_patterns);
        assert_eq!(parsed.privileged_flags.len(), 1);
        assert_eq!(parsed.privileged_flags[0].tool, "nmap");
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let config = Config::load(&path).unwrap();
        assert!(!config.models.is_empty());
        assert!(!config.noise_patterns.is_empty());
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.output_dir = PathBuf::from("/tmp/custom");
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.output_dir, PathBuf::from("/tmp/custom"));
    }
}
