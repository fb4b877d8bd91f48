//! JSON-over-HTTP collector client.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{RegistrationInfo, Transport, TransportError};
use crate::collector::probe::ProbeDefinition;
use crate::config::ServerConfig;
use crate::identity::AgentIdentity;
use crate::metrics::MetricEnvelope;

/// Request timeout for every collector call (10 seconds).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the shared API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Response wrapper used by every collector endpoint.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    code: i64,
    data: Option<T>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RegisteredAgent {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Serialize)]
struct MetricsReport<'a> {
    agent_id: &'a str,
    metrics: &'a [MetricEnvelope],
}

/// Collector client authenticated with a shared API key.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a client for `server`.
    ///
    /// # Errors
    /// Returns `TransportError` if the API key is not a valid header value or
    /// the HTTP client cannot be built.
    pub fn new(server: &ServerConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        let mut api_key = HeaderValue::from_str(&server.api_key)?;
        api_key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, api_key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: server.url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send `request` and decode the `data` field of the response wrapper.
    async fn call<T: DeserializeOwned>(
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Option<T>, TransportError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let wrapped: ApiResponse<T> = serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::InvalidResponse(format!("{operation}: {e}")))?;
        tracing::trace!(
            operation,
            code = wrapped.code,
            message = %wrapped.message,
            "Collector response"
        );
        Ok(wrapped.data)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn register(&self, info: &RegistrationInfo) -> Result<AgentIdentity, TransportError> {
        let request = self.client.post(self.url("/agents/register")).json(info);
        let agent: Option<RegisteredAgent> = Self::call("register", request).await?;

        match agent.map(|a| a.id) {
            Some(id) if !id.trim().is_empty() => Ok(AgentIdentity::new(id.trim())),
            _ => Err(TransportError::EmptyIdentity),
        }
    }

    async fn heartbeat(&self, identity: &AgentIdentity) -> Result<(), TransportError> {
        let request = self
            .client
            .post(self.url(&format!("/agents/{}/heartbeat", identity.id())));
        Self::call::<serde_json::Value>("heartbeat", request).await?;
        Ok(())
    }

    async fn report_metrics(
        &self,
        identity: &AgentIdentity,
        batch: &[MetricEnvelope],
    ) -> Result<(), TransportError> {
        let report = MetricsReport {
            agent_id: identity.id(),
            metrics: batch,
        };
        let request = self.client.post(self.url("/agents/metrics")).json(&report);
        Self::call::<serde_json::Value>("report metrics", request).await?;
        Ok(())
    }

    async fn fetch_probe_definitions(
        &self,
        identity: &AgentIdentity,
    ) -> Result<Vec<ProbeDefinition>, TransportError> {
        let request = self
            .client
            .get(self.url(&format!("/agents/{}/monitor-tasks", identity.id())));
        let definitions: Option<Vec<ProbeDefinition>> =
            Self::call("fetch monitor tasks", request).await?;
        Ok(definitions.unwrap_or_default())
    }
}
