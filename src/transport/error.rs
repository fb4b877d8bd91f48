//! Transport-specific error types.
//!
//! All collector calls return [`TransportError`] on failure. Whether a
//! failure is fatal is decided by the caller: only registration at startup
//! aborts the agent.

use thiserror::Error;

/// Errors that can occur talking to the remote collector.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request could not be sent or the response could not be read.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Collector answered with a non-success status.
    #[error("{operation} failed: HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// Response body did not match the expected envelope.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// API key cannot be sent as a header value.
    #[error("invalid api key: {0}")]
    InvalidApiKey(#[from] reqwest::header::InvalidHeaderValue),

    /// Registration succeeded but no identity was returned.
    #[error("collector returned an empty agent id")]
    EmptyIdentity,
}
