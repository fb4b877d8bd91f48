//! HTTP endpoint probe.
//!
//! Measures HTTP/HTTPS response latency, validates the status code and
//! optional body content, and reports the leaf certificate expiry of TLS
//! endpoints.

use std::error::Error as _;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::{Client, Method, Response, redirect};

use crate::collector::CollectorError;
use crate::collector::probe::{ProbeDefinition, ProbeResult, ProbeStatus, elapsed_ms};

/// Default request timeout (60 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default expected HTTP status code.
const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Redirect hops followed before the probe fails.
const MAX_REDIRECTS: usize = 10;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// HTTP endpoint probe.
///
/// Certificate validation is disabled so self-signed endpoints can still be
/// checked for reachability; the peer certificate is inspected for expiry
/// instead.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

/// Leaf certificate expiry extracted from a TLS response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CertExpiry {
    epoch_ms: i64,
    days_remaining: i64,
}

impl HttpProbe {
    /// # Errors
    /// Returns `CollectorError::Unavailable` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, CollectorError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .tls_info(true)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| {
                CollectorError::Unavailable(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client })
    }

    pub async fn check(&self, definition: &ProbeDefinition) -> ProbeResult {
        let method = match definition.method.as_deref().filter(|m| !m.is_empty()) {
            None => Method::GET,
            Some(m) => match Method::from_bytes(m.to_ascii_uppercase().as_bytes()) {
                Ok(method) => method,
                Err(e) => {
                    return ProbeResult::down(
                        definition,
                        format!("create request failed: invalid method '{m}': {e}"),
                    );
                }
            },
        };
        let timeout = definition.timeout_or(DEFAULT_TIMEOUT);
        let expected_status = definition
            .expected_status_code
            .filter(|code| *code > 0)
            .unwrap_or(DEFAULT_EXPECTED_STATUS);

        let mut request = self
            .client
            .request(method, &definition.target)
            .timeout(timeout);
        for (key, value) in definition.headers.iter().flatten() {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = definition.body.as_ref().filter(|b| !b.is_empty()) {
            request = request.body(body.clone());
        }

        // Timing ends once status and headers are available.
        let start = Instant::now();
        let sent = request.send().await;
        let response_time_ms = elapsed_ms(start);

        let mut result = ProbeResult::down(definition, String::new());
        result.response_time_ms = response_time_ms;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                result.error = Some(format!("request failed: {}", describe(&e)));
                return result;
            }
        };

        let status = response.status().as_u16();
        result.status_code = Some(status);

        if let Some(expiry) = cert_expiry(&response) {
            result.cert_expiry_epoch_ms = Some(expiry.epoch_ms);
            result.cert_days_remaining = Some(expiry.days_remaining);
        }

        if status != expected_status {
            result.error = Some(format!(
                "status code mismatch: expected {expected_status}, got {status}"
            ));
            result.message = Some(format!("HTTP {status}"));
            return result;
        }

        if let Some(expected) = definition.expected_content() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    result.error = Some(format!("read response body failed: {}", describe(&e)));
                    return result;
                }
            };

            if !body.contains(expected) {
                result.error = Some(format!(
                    "content does not contain expected string: {expected}"
                ));
                result.content_matched = Some(false);
                return result;
            }
            result.content_matched = Some(true);
        }

        result.status = ProbeStatus::Up;
        result.error = None;
        result.message = Some(format!("HTTP {status} - {response_time_ms}ms"));
        result
    }
}

/// Error text including its source chain; reqwest's top-level message alone
/// does not name the cause.
fn describe(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn cert_expiry(response: &Response) -> Option<CertExpiry> {
    let der = response
        .extensions()
        .get::<reqwest::tls::TlsInfo>()?
        .peer_certificate()?;
    let not_after_ms = leaf_not_after_ms(der)?;
    Some(expiry_from(not_after_ms, Utc::now().timestamp_millis()))
}

fn leaf_not_after_ms(der: &[u8]) -> Option<i64> {
    match x509_parser::parse_x509_certificate(der) {
        Ok((_, cert)) => cert.validity().not_after.timestamp().checked_mul(1000),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse peer certificate");
            None
        }
    }
}

/// Whole days from `now_ms` to `not_after_ms`, truncated toward zero.
fn expiry_from(not_after_ms: i64, now_ms: i64) -> CertExpiry {
    CertExpiry {
        epoch_ms: not_after_ms,
        days_remaining: (not_after_ms - now_ms) / MS_PER_DAY,
    }
}
