//! Agent configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default metrics collection interval in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Default heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default identity file, relative to the working directory.
pub const DEFAULT_IDENTITY_FILE: &str = ".agent_id";

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

fn default_identity_file() -> String {
    DEFAULT_IDENTITY_FILE.to_string()
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Remote collector endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the collector API (e.g. `https://oculus.example.com/api`).
    pub url: String,

    /// API key sent as `X-API-Key`. Supports `${VAR}` and `${VAR:-default}`.
    #[serde(default)]
    pub api_key: String,
}

// =============================================================================
// Agent Configuration
// =============================================================================

/// Registration overrides and identity storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Display name sent at registration.
    pub name: Option<String>,

    /// Host name override (empty: detected host name).
    pub hostname: String,

    /// IP override (empty: `127.0.0.1`).
    pub ip: String,

    /// Identity file path (default: `.agent_id`).
    pub identity_file: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: None,
            hostname: String::new(),
            ip: String::new(),
            identity_file: default_identity_file(),
        }
    }
}

// =============================================================================
// Collector Timing
// =============================================================================

/// Collection timing in whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSection {
    /// Metrics collection interval (default: 60).
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Heartbeat interval (default: 30).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL_SECS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_SECS,
        }
    }
}

impl CollectorSection {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }
}

// =============================================================================
// Top-level Configuration
// =============================================================================

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Remote collector endpoint.
    pub server: ServerConfig,

    /// Registration and identity settings.
    #[serde(default)]
    pub agent: AgentSection,

    /// Collection timing.
    #[serde(default)]
    pub collector: CollectorSection,
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    ///
    /// Environment references in `server.api_key` are expanded.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.server.api_key = expand_env_vars(&config.server.api_key);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.server.url).map_err(|e| {
            ConfigError::ValidationError(format!("invalid server url '{}': {}", self.server.url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "server url must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.collector.interval == 0 {
            return Err(ConfigError::ValidationError(
                "collector interval must be positive".to_string(),
            ));
        }

        if self.collector.heartbeat_interval == 0 {
            return Err(ConfigError::ValidationError(
                "collector heartbeat_interval must be positive".to_string(),
            ));
        }

        if self.agent.identity_file.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "agent identity_file cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
server:
  url: "https://oculus.example.com/api"
  api_key: "${OCULUS_TEST_MISSING_KEY:-k-123}"
agent:
  name: "web-01"
  hostname: "web-01.internal"
  ip: "10.0.0.5"
  identity_file: "/var/lib/oculus-agent/id"
collector:
  interval: 15
  heartbeat_interval: 5
"#;

    #[test]
    fn test_full_config() {
        let config = AgentConfig::from_yaml(FULL).unwrap();

        assert_eq!(config.server.url, "https://oculus.example.com/api");
        assert_eq!(config.server.api_key, "k-123");
        assert_eq!(config.agent.name.as_deref(), Some("web-01"));
        assert_eq!(config.agent.hostname, "web-01.internal");
        assert_eq!(config.agent.identity_file, "/var/lib/oculus-agent/id");
        assert_eq!(config.collector.metrics_interval(), Duration::from_secs(15));
        assert_eq!(config.collector.heartbeat_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_yaml("server:\n  url: http://127.0.0.1:8000\n").unwrap();

        assert_eq!(config.server.api_key, "");
        assert_eq!(config.agent.identity_file, DEFAULT_IDENTITY_FILE);
        assert!(config.agent.hostname.is_empty());
        assert_eq!(config.collector.interval, DEFAULT_INTERVAL_SECS);
        assert_eq!(
            config.collector.heartbeat_interval,
            DEFAULT_HEARTBEAT_INTERVAL_SECS
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let yaml = "server:\n  url: http://localhost\ncollector:\n  interval: 0\n";
        let err = AgentConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("interval must be positive"));

        let yaml = "server:\n  url: http://localhost\ncollector:\n  heartbeat_interval: 0\n";
        let err = AgentConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("heartbeat_interval"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = AgentConfig::from_yaml("server:\n  url: not a url\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = AgentConfig::from_yaml("server:\n  url: ftp://example.com\n").unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn test_missing_server_section() {
        let err = AgentConfig::from_yaml("collector:\n  interval: 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, FULL).unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.collector.interval, 15);

        let err = AgentConfig::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
