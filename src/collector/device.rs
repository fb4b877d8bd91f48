//! Accelerator (GPU) inventory and readings.
//!
//! Static facts (index, name, total memory) are discovered once per process
//! and cached in [`DeviceStaticCache`]. Dynamic readings are queried every
//! cycle and merged with the cached record of the same index.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::collector::CollectorError;
use crate::collector::traits::{DEFAULT_COMMAND_TIMEOUT, run_command};
use crate::metrics::GpuMetrics;

const NVIDIA_SMI: &str = "nvidia-smi";
const STATIC_QUERY: &str = "--query-gpu=index,name,memory.total";
const DYNAMIC_QUERY: &str =
    "--query-gpu=index,temperature.gpu,utilization.gpu,memory.used,memory.free,power.draw,fan.speed";
const CSV_FORMAT: &str = "--format=csv,noheader,nounits";

const MIB: u64 = 1024 * 1024;

/// Immutable hardware facts of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStaticInfo {
    pub index: u32,
    pub name: String,
    pub capacity_bytes: u64,
}

/// Fast-changing readings of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub index: u32,
    pub temperature: f64,
    pub utilization: f64,
    pub memory_used: u64,
    pub memory_free: u64,
    pub power_draw: f64,
    pub fan_speed: f64,
}

/// Backend answering inventory and reading queries.
#[async_trait::async_trait]
pub trait DeviceQuery: Send + Sync + 'static {
    /// Enumerate devices and their static facts.
    async fn inventory(&self) -> Result<Vec<DeviceStaticInfo>, CollectorError>;

    /// Current readings for every device.
    async fn readings(&self) -> Result<Vec<DeviceReading>, CollectorError>;
}

/// `nvidia-smi` backed device queries.
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    timeout: Duration,
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl NvidiaSmi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bound for each tool invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl DeviceQuery for NvidiaSmi {
    async fn inventory(&self) -> Result<Vec<DeviceStaticInfo>, CollectorError> {
        let output = run_command(NVIDIA_SMI, &[STATIC_QUERY, CSV_FORMAT], self.timeout).await?;
        parse_inventory(&output)
    }

    async fn readings(&self) -> Result<Vec<DeviceReading>, CollectorError> {
        let output = run_command(NVIDIA_SMI, &[DYNAMIC_QUERY, CSV_FORMAT], self.timeout).await?;
        parse_readings(&output)
    }
}

fn csv_records(output: &str) -> Result<Vec<csv::StringRecord>, CollectorError> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(output.as_bytes())
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CollectorError::Parse(format!("invalid {NVIDIA_SMI} csv: {e}")))
}

// Cells such as "[N/A]" read as zero.
fn cell<T: std::str::FromStr + Default>(record: &csv::StringRecord, i: usize) -> T {
    record.get(i).and_then(|v| v.parse().ok()).unwrap_or_default()
}

/// Parse `index, name, memory.total [MiB]` rows.
pub fn parse_inventory(output: &str) -> Result<Vec<DeviceStaticInfo>, CollectorError> {
    Ok(csv_records(output)?
        .iter()
        .filter(|record| record.len() >= 3)
        .map(|record| DeviceStaticInfo {
            index: cell(record, 0),
            name: record.get(1).unwrap_or_default().to_string(),
            capacity_bytes: cell::<u64>(record, 2) * MIB,
        })
        .collect())
}

/// Parse `index, temperature, utilization, memory.used, memory.free,
/// power.draw, fan.speed` rows. Memory is reported in MiB.
pub fn parse_readings(output: &str) -> Result<Vec<DeviceReading>, CollectorError> {
    Ok(csv_records(output)?
        .iter()
        .filter(|record| record.len() >= 7)
        .map(|record| DeviceReading {
            index: cell(record, 0),
            temperature: cell(record, 1),
            utilization: cell(record, 2),
            memory_used: cell::<u64>(record, 3) * MIB,
            memory_free: cell::<u64>(record, 4) * MIB,
            power_draw: cell(record, 5),
            fan_speed: cell(record, 6),
        })
        .collect())
}

/// Lazily discovered device inventory combined with per-cycle readings.
///
/// Discovery runs at most once per cache instance, even when many callers
/// race on the first request. A failed or empty discovery is cached as an
/// empty inventory for the lifetime of the cache.
pub struct DeviceStaticCache {
    query: Box<dyn DeviceQuery>,
    inventory: OnceCell<BTreeMap<u32, DeviceStaticInfo>>,
}

impl std::fmt::Debug for DeviceStaticCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStaticCache")
            .field("inventory", &self.inventory.get())
            .finish_non_exhaustive()
    }
}

impl DeviceStaticCache {
    pub fn new(query: impl DeviceQuery) -> Self {
        Self {
            query: Box::new(query),
            inventory: OnceCell::new(),
        }
    }

    /// Static inventory keyed by device index, discovered on first call.
    pub async fn discover(&self) -> &BTreeMap<u32, DeviceStaticInfo> {
        self.inventory
            .get_or_init(|| async {
                match self.query.inventory().await {
                    Ok(devices) => {
                        tracing::info!(count = devices.len(), "Device inventory discovered");
                        devices.into_iter().map(|d| (d.index, d)).collect()
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "No device inventory available");
                        BTreeMap::new()
                    }
                }
            })
            .await
    }

    /// Merge fresh readings with the cached inventory.
    ///
    /// With an empty inventory no reading is queried. Readings for indices
    /// missing from the inventory are dropped. A failed reading query yields
    /// no rows.
    pub async fn collect(&self) -> Vec<GpuMetrics> {
        let inventory = self.discover().await;
        if inventory.is_empty() {
            return Vec::new();
        }

        let readings = match self.query.readings().await {
            Ok(readings) => readings,
            Err(e) => {
                tracing::warn!(error = %e, "Device reading query failed");
                return Vec::new();
            }
        };

        readings
            .into_iter()
            .filter_map(|reading| {
                let info = inventory.get(&reading.index)?;
                Some(GpuMetrics {
                    index: info.index,
                    name: info.name.clone(),
                    memory_total: info.capacity_bytes,
                    temperature: reading.temperature,
                    utilization: reading.utilization,
                    memory_used: reading.memory_used,
                    memory_free: reading.memory_free,
                    power_draw: reading.power_draw,
                    fan_speed: reading.fan_speed,
                })
            })
            .collect()
    }
}
