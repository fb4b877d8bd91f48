//! Core collector traits and types.

use std::time::Duration;

use thiserror::Error;

use crate::metrics::{
    CpuMetrics, DiskMetrics, HostMetrics, LoadMetrics, MemoryMetrics, TemperatureMetrics,
};

/// Default bound for external tool invocations (10 seconds).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur while acquiring raw facts.
///
/// These never abort a collection cycle: the affected metric category is
/// dropped from the batch and the error is logged.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// I/O error (spawning a tool, reading a pseudo-file, ...).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// External tool did not finish within its bound.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// External tool exited unsuccessfully.
    #[error("command '{command}' failed: {detail}")]
    Command { command: String, detail: String },

    /// Tool output could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// The fact source has nothing to report on this host.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Cumulative disk I/O counters for one block device.
///
/// Times are in milliseconds. Sources that cannot report operation counts
/// leave them at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskCounters {
    /// Kernel device name without `/dev/` (e.g. `sda`, `nvme0n1`).
    pub device: String,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_count: u64,
    pub write_count: u64,
    pub read_time: u64,
    pub write_time: u64,
    pub io_time: u64,
    pub iops_in_progress: u64,
}

/// Cumulative network counters for one interface (or the `all` aggregate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCounters {
    pub interface: String,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// Source of raw host facts.
///
/// Every method is independent: a failure in one category must not affect
/// the others. Counter methods return cumulative values; rate derivation is
/// done by the caller.
#[async_trait::async_trait]
pub trait FactSource: Send + Sync + 'static {
    async fn cpu(&self) -> Result<CpuMetrics, CollectorError>;

    async fn memory(&self) -> Result<MemoryMetrics, CollectorError>;

    /// Usage of the root filesystem.
    async fn disk(&self) -> Result<DiskMetrics, CollectorError>;

    async fn disk_counters(&self) -> Result<Vec<DiskCounters>, CollectorError>;

    /// Aggregate counters across all interfaces.
    async fn network_counters(&self) -> Result<NetworkCounters, CollectorError>;

    async fn load(&self) -> Result<LoadMetrics, CollectorError>;

    async fn host(&self) -> Result<HostMetrics, CollectorError>;

    async fn temperatures(&self) -> Result<Vec<TemperatureMetrics>, CollectorError>;
}

/// Run an external tool with a bounded duration and return its stdout.
///
/// A missing binary surfaces as [`CollectorError::Io`] with `NotFound` kind.
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    limit: Duration,
) -> Result<String, CollectorError> {
    let mut command = tokio::process::Command::new(program);
    command.args(args).kill_on_drop(true);

    let output = tokio::time::timeout(limit, command.output())
        .await
        .map_err(|_| CollectorError::Timeout(limit))??;

    if !output.status.success() {
        return Err(CollectorError::Command {
            command: program.to_string(),
            detail: format!(
                "{} ({})",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    String::from_utf8(output.stdout)
        .map_err(|e| CollectorError::Parse(format!("{program} output is not UTF-8: {e}")))
}
