//! Active probe definitions, results and dispatch.
//!
//! Probe definitions are fetched from the collector every cycle and executed
//! by [`ProbeExecutor`]. Execution never fails: every problem is encoded in
//! the returned [`ProbeResult`] with `status = down`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::collector::CollectorError;
use crate::collector::http::HttpProbe;
use crate::collector::tcp::TcpProbe;

/// Kind of active check, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeKind {
    Http,
    Https,
    Tcp,
    Other(String),
}

impl From<&str> for ProbeKind {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "http" => Self::Http,
            "https" => Self::Https,
            "tcp" => Self::Tcp,
            _ => Self::Other(value.to_string()),
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Https => f.write_str("https"),
            Self::Tcp => f.write_str("tcp"),
            Self::Other(kind) => f.write_str(kind),
        }
    }
}

/// An externally supplied active check.
///
/// Zero or empty optional fields on the wire mean "use the default".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeDefinition {
    pub id: String,
    /// Kind as spelled by the collector; echoed unchanged in results.
    #[serde(rename = "type")]
    pub kind_name: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status_code: Option<u16>,
    #[serde(
        default,
        rename = "expected_content",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_content_substring: Option<String>,
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl ProbeDefinition {
    /// Create a definition with every optional field unset.
    pub fn new(id: impl Into<String>, kind: ProbeKind, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind_name: kind.to_string(),
            target: target.into(),
            method: None,
            headers: None,
            body: None,
            expected_status_code: None,
            expected_content_substring: None,
            timeout_seconds: None,
        }
    }

    pub fn kind(&self) -> ProbeKind {
        ProbeKind::from(self.kind_name.as_str())
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status_code = Some(status);
        self
    }

    pub fn with_expected_content(mut self, substring: impl Into<String>) -> Self {
        self.expected_content_substring = Some(substring.into());
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Configured timeout, or `default` when unset or zero.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        match self.timeout_seconds {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => default,
        }
    }

    /// Non-empty expected content substring.
    pub fn expected_content(&self) -> Option<&str> {
        self.expected_content_substring
            .as_deref()
            .filter(|s| !s.is_empty())
    }
}

/// Outcome of one probe execution.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Down,
}

/// Result of one probe execution. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    #[serde(rename = "monitor_id")]
    pub probe_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    pub status: ProbeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(rename = "response_time")]
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        rename = "content_match",
        skip_serializing_if = "Option::is_none"
    )]
    pub content_matched: Option<bool>,
    #[serde(
        default,
        rename = "cert_expiry_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub cert_expiry_epoch_ms: Option<i64>,
    #[serde(
        default,
        rename = "cert_days_left",
        skip_serializing_if = "Option::is_none"
    )]
    pub cert_days_remaining: Option<i64>,
}

impl ProbeResult {
    /// A `down` result carrying `error` and nothing else.
    pub fn down(definition: &ProbeDefinition, error: impl Into<String>) -> Self {
        Self {
            probe_id: definition.id.clone(),
            kind: definition.kind_name.clone(),
            target: definition.target.clone(),
            status: ProbeStatus::Down,
            status_code: None,
            response_time_ms: 0,
            error: Some(error.into()),
            message: None,
            content_matched: None,
            cert_expiry_epoch_ms: None,
            cert_days_remaining: None,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == ProbeStatus::Up
    }
}

/// Milliseconds elapsed since `start`.
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().min(u64::MAX as u128) as u64
}

/// Dispatches probe definitions to the HTTP or TCP probe.
#[derive(Debug, Clone)]
pub struct ProbeExecutor {
    http: HttpProbe,
    tcp: TcpProbe,
}

impl ProbeExecutor {
    /// # Errors
    /// Returns `CollectorError::Unavailable` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, CollectorError> {
        Ok(Self {
            http: HttpProbe::new()?,
            tcp: TcpProbe::new(),
        })
    }

    /// Run one definition. Never fails.
    pub async fn execute(&self, definition: &ProbeDefinition) -> ProbeResult {
        let result = match definition.kind() {
            ProbeKind::Http | ProbeKind::Https => self.http.check(definition).await,
            ProbeKind::Tcp => self.tcp.check(definition).await,
            ProbeKind::Other(kind) => {
                ProbeResult::down(definition, format!("unsupported monitor type: {kind}"))
            }
        };

        if result.is_up() {
            tracing::debug!(
                probe_id = %result.probe_id,
                target = %result.target,
                response_time_ms = result.response_time_ms,
                "Probe up"
            );
        } else {
            tracing::warn!(
                probe_id = %result.probe_id,
                target = %result.target,
                error = result.error.as_deref().unwrap_or_default(),
                "Probe down"
            );
        }
        result
    }

    /// Run all definitions concurrently. Results follow definition order.
    pub async fn execute_all(&self, definitions: &[ProbeDefinition]) -> Vec<ProbeResult> {
        futures::future::join_all(definitions.iter().map(|d| self.execute(d))).await
    }
}
