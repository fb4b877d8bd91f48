//! Configuration module for the Oculus agent.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Collector endpoint settings (URL, API key)
//! - Agent identity settings (name, hostname/IP overrides, identity file)
//! - Collection timing (metrics and heartbeat intervals)

mod app;
mod validation;

pub use app::{AgentConfig, AgentSection, CollectorSection, ServerConfig};
pub use validation::{ConfigError, expand_env_vars};

// Re-export constants
pub use app::{DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_IDENTITY_FILE, DEFAULT_INTERVAL_SECS};
