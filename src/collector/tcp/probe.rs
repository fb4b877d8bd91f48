//! TCP port probe.
//!
//! Measures TCP connection latency to a `host:port` target. Only the
//! handshake is performed; no data is exchanged.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::collector::probe::{ProbeDefinition, ProbeResult, ProbeStatus, elapsed_ms};

/// Default connection timeout (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP port probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl TcpProbe {
    pub fn new() -> Self {
        Self
    }

    pub async fn check(&self, definition: &ProbeDefinition) -> ProbeResult {
        let conn_timeout = definition.timeout_or(DEFAULT_TIMEOUT);

        let start = Instant::now();
        let outcome = timeout(conn_timeout, TcpStream::connect(definition.target.as_str())).await;
        let response_time_ms = elapsed_ms(start);

        let mut result = ProbeResult::down(definition, String::new());
        result.response_time_ms = response_time_ms;

        match outcome {
            Ok(Ok(_stream)) => {
                result.status = ProbeStatus::Up;
                result.error = None;
                result.message = Some(format!("TCP connected - {response_time_ms}ms"));
            }
            Ok(Err(e)) => {
                result.error = Some(format!("connection failed: {e}"));
            }
            Err(_) => {
                result.error = Some(format!(
                    "connection failed: timed out after {}ms",
                    conn_timeout.as_millis()
                ));
            }
        }
        result
    }
}
