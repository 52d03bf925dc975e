//! Configuration management for Stagehand
//!
//! Configuration is loaded from `~/.stagehand/config.json` (or an explicit
//! path) with environment variable overrides.

mod types;
pub mod validate;

pub use types::*;

use crate::error::Result;
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the Stagehand configuration directory path (~/.stagehand)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".stagehand")
    }

    /// Returns the path to the config file (~/.stagehand/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `STAGEHAND_SECTION_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: STAGEHAND_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        // Logging
        if let Ok(val) = std::env::var("STAGEHAND_LOGGING_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("STAGEHAND_LOGGING_FORMAT") {
            match val.to_ascii_lowercase().as_str() {
                "pretty" => self.logging.format = LogFormat::Pretty,
                "component" => self.logging.format = LogFormat::Component,
                "json" => self.logging.format = LogFormat::Json,
                _ => {}
            }
        }

        // Probe
        if let Ok(val) = std::env::var("STAGEHAND_PROBE_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                self.probe.interval_ms = v;
            }
        }
        if let Ok(val) = std::env::var("STAGEHAND_PROBE_MAX_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                self.probe.max_attempts = v;
            }
        }
        if let Ok(val) = std::env::var("STAGEHAND_PROBE_MAX_DELAY_MS") {
            if let Ok(v) = val.parse() {
                self.probe.max_delay_ms = v;
            }
        }
        if let Ok(val) = std::env::var("STAGEHAND_PROBE_BACKOFF") {
            match val.to_ascii_lowercase().as_str() {
                "fixed" => self.probe.backoff = BackoffKind::Fixed,
                "exponential" => self.probe.backoff = BackoffKind::Exponential,
                _ => {}
            }
        }

        // Scheduler
        if let Ok(val) = std::env::var("STAGEHAND_SCHEDULER_INSTANTIATE_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.scheduler.instantiate_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("STAGEHAND_SCHEDULER_JOB_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.scheduler.job_timeout_secs = v;
            }
        }

        // Runtime
        if let Ok(val) = std::env::var("STAGEHAND_RUNTIME_DOCKER_BINARY") {
            self.runtime.docker_binary = val;
        }
        if let Ok(val) = std::env::var("STAGEHAND_RUNTIME_NETWORK") {
            self.runtime.network = Some(val).filter(|v| !v.is_empty());
        }

        // Telemetry
        if let Ok(val) = std::env::var("STAGEHAND_TELEMETRY_OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = val;
        }
        if let Ok(val) = std::env::var("STAGEHAND_TELEMETRY_ENABLED") {
            if let Ok(v) = val.parse() {
                self.telemetry.enabled = v;
            }
        }

        // Topology
        if let Ok(val) = std::env::var("STAGEHAND_TOPOLOGY_ROOT") {
            self.topology.root = Some(val);
        }
        if let Ok(val) = std::env::var("STAGEHAND_TOPOLOGY_TOKEN") {
            self.topology.token = Some(val);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.scheduler.teardown_timeout_secs, 30);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"runtime":{"backend":"dry_run"},"topology":{"token":"abc123"}}"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.runtime.backend, RuntimeBackend::DryRun);
        assert_eq!(config.topology.token.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_load_invalid_json_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_config_path_under_dir() {
        assert!(Config::path().starts_with(Config::dir()));
        assert!(Config::path().ends_with("config.json"));
    }
}
