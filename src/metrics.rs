//! Metric envelope and payload types.
//!
//! Every batch sent to the collector is a sequence of [`MetricEnvelope`]s. An
//! envelope pairs a [`MetricPayload`] variant with a millisecond timestamp and
//! serializes as:
//!
//! ```json
//! {"type": "cpu", "data": {"usage_percent": 12.5, ...}, "timestamp": 1700000000000}
//! ```
//!
//! Payloads are flat records with a fixed field list per metric type.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::collector::probe::ProbeResult;

/// Discriminant of a metric payload, as sent in the envelope `type` field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum MetricType {
    Cpu,
    Memory,
    Disk,
    DiskIo,
    Network,
    Load,
    Host,
    Gpu,
    Temperature,
    Monitor,
}

/// CPU utilization and topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub usage_percent: f64,
    pub logical_cores: usize,
    pub physical_cores: usize,
    pub model_name: String,
}

/// Physical memory and swap usage in bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub swap_free: u64,
}

/// Filesystem usage of a mount point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub mount_point: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f64,
}

/// Cumulative and derived I/O throughput of one block device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskIoMetrics {
    pub device: String,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_count: u64,
    pub write_count: u64,
    pub read_time: u64,
    pub write_time: u64,
    pub io_time: u64,
    pub iops_in_progress: u64,
    pub read_bytes_rate: u64,
    pub write_bytes_rate: u64,
}

/// Cumulative and derived network throughput.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub interface: String,
    pub bytes_sent_total: u64,
    pub bytes_recv_total: u64,
    pub bytes_sent_rate: u64,
    pub bytes_recv_rate: u64,
}

/// System load averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadMetrics {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

/// Slow-changing host facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    pub os: String,
    pub platform: String,
    pub platform_version: String,
    pub kernel_version: String,
    pub kernel_arch: String,
    pub uptime: u64,
    pub boot_time: u64,
    pub procs: u64,
}

/// One accelerator: static inventory merged with a dynamic reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuMetrics {
    pub index: u32,
    pub name: String,
    pub memory_total: u64,
    pub temperature: f64,
    pub utilization: f64,
    pub memory_used: u64,
    pub memory_free: u64,
    pub power_draw: f64,
    pub fan_speed: f64,
}

/// One temperature sensor reading in degrees Celsius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureMetrics {
    pub sensor_key: String,
    pub sensor_label: String,
    pub temperature: f64,
}

/// Closed set of payloads, tagged by [`MetricType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MetricPayload {
    Cpu(CpuMetrics),
    Memory(MemoryMetrics),
    Disk(DiskMetrics),
    DiskIo(DiskIoMetrics),
    Network(NetworkMetrics),
    Load(LoadMetrics),
    Host(HostMetrics),
    Gpu(GpuMetrics),
    Temperature(TemperatureMetrics),
    Monitor(ProbeResult),
}

impl MetricPayload {
    /// The discriminant carried in the envelope `type` field.
    pub fn metric_type(&self) -> MetricType {
        match self {
            Self::Cpu(_) => MetricType::Cpu,
            Self::Memory(_) => MetricType::Memory,
            Self::Disk(_) => MetricType::Disk,
            Self::DiskIo(_) => MetricType::DiskIo,
            Self::Network(_) => MetricType::Network,
            Self::Load(_) => MetricType::Load,
            Self::Host(_) => MetricType::Host,
            Self::Gpu(_) => MetricType::Gpu,
            Self::Temperature(_) => MetricType::Temperature,
            Self::Monitor(_) => MetricType::Monitor,
        }
    }
}

/// Unit of transport: one payload stamped with the cycle timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEnvelope {
    #[serde(flatten)]
    pub payload: MetricPayload,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl MetricEnvelope {
    /// Create an envelope for `payload` at `timestamp_ms`.
    pub fn new(payload: MetricPayload, timestamp_ms: i64) -> Self {
        Self {
            payload,
            timestamp: timestamp_ms,
        }
    }

    pub fn metric_type(&self) -> MetricType {
        self.payload.metric_type()
    }
}
