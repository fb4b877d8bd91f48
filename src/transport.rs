//! Transport Layer
//!
//! Request/response calls to the remote collector:
//! - **register**: exchange host facts for an agent identity
//! - **heartbeat**: liveness signal without payload
//! - **report_metrics**: submit one batch of envelopes
//! - **fetch_probe_definitions**: pull the active checks assigned to this agent
//!
//! # Components
//!
//! - [`Transport`]: Collector client seam used by the scheduler
//! - [`HttpTransport`]: JSON-over-HTTP implementation with API-key auth
//! - [`TransportError`]: Failure taxonomy for collector calls

mod error;
mod http;

pub use error::TransportError;
pub use http::HttpTransport;

use serde::{Deserialize, Serialize};

use crate::collector::probe::ProbeDefinition;
use crate::config::AgentSection;
use crate::identity::AgentIdentity;
use crate::metrics::MetricEnvelope;

/// Host facts sent once at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationInfo {
    pub hostname: String,
    pub ip: String,
    pub os: String,
    pub arch: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// IP reported when no override is configured.
pub const DEFAULT_AGENT_IP: &str = "127.0.0.1";

impl RegistrationInfo {
    /// Build registration info from configured overrides and detected host facts.
    pub fn detect(agent: &AgentSection) -> Self {
        let hostname = if agent.hostname.trim().is_empty() {
            sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string())
        } else {
            agent.hostname.trim().to_string()
        };
        Self::with_hostname(agent, hostname)
    }

    fn with_hostname(agent: &AgentSection, hostname: String) -> Self {
        let ip = match agent.ip.trim() {
            "" => DEFAULT_AGENT_IP.to_string(),
            ip => ip.to_string(),
        };

        Self {
            hostname,
            ip,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            name: agent.name.clone().filter(|n| !n.trim().is_empty()),
        }
    }
}

/// Client for the remote collector.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn register(&self, info: &RegistrationInfo) -> Result<AgentIdentity, TransportError>;

    async fn heartbeat(&self, identity: &AgentIdentity) -> Result<(), TransportError>;

    async fn report_metrics(
        &self,
        identity: &AgentIdentity,
        batch: &[MetricEnvelope],
    ) -> Result<(), TransportError>;

    async fn fetch_probe_definitions(
        &self,
        identity: &AgentIdentity,
    ) -> Result<Vec<ProbeDefinition>, TransportError>;
}
