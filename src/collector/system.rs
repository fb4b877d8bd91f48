//! Host fact acquisition backed by `sysinfo`.
//!
//! [`SystemFacts`] implements [`FactSource`] for the local machine. Counters
//! are returned as cumulative values; rates are derived by the caller.

use std::sync::{Arc, Mutex};

use sysinfo::{Components, Disks, Networks, ProcessesToUpdate, System};

use crate::collector::traits::{
    DEFAULT_COMMAND_TIMEOUT, DiskCounters, FactSource, NetworkCounters, run_command,
};
use crate::collector::CollectorError;
use crate::metrics::{
    CpuMetrics, DiskMetrics, HostMetrics, LoadMetrics, MemoryMetrics, TemperatureMetrics,
};

/// Mount point reported by the `disk` category.
const ROOT_MOUNT: &str = "/";

/// Plausible sensor range in degrees Celsius (exclusive lower bound).
const MIN_TEMPERATURE: f64 = 0.0;
const MAX_TEMPERATURE: f64 = 150.0;

/// Interface label of the aggregated network counters.
pub const ALL_INTERFACES: &str = "all";

/// Facts of the machine the agent runs on.
///
/// The `sysinfo` handle is kept between cycles so CPU usage is measured
/// against the previous refresh.
#[derive(Clone)]
pub struct SystemFacts {
    system: Arc<Mutex<System>>,
}

impl std::fmt::Debug for SystemFacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemFacts").finish_non_exhaustive()
    }
}

impl Default for SystemFacts {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemFacts {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    fn with_system<T>(&self, f: impl FnOnce(&mut System) -> T) -> T {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut system)
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn valid_temperature(celsius: f64) -> bool {
    celsius > MIN_TEMPERATURE && celsius <= MAX_TEMPERATURE
}

#[async_trait::async_trait]
impl FactSource for SystemFacts {
    async fn cpu(&self) -> Result<CpuMetrics, CollectorError> {
        // Usage needs two refreshes separated by the minimum update interval.
        self.with_system(|sys| sys.refresh_cpu_all());
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;

        self.with_system(|sys| {
            sys.refresh_cpu_all();
            let cpus = sys.cpus();
            if cpus.is_empty() {
                return Err(CollectorError::Unavailable("no cpu reported".to_string()));
            }
            Ok(CpuMetrics {
                usage_percent: f64::from(sys.global_cpu_usage()),
                logical_cores: cpus.len(),
                physical_cores: System::physical_core_count().unwrap_or(cpus.len()),
                model_name: cpus[0].brand().trim().to_string(),
            })
        })
    }

    async fn memory(&self) -> Result<MemoryMetrics, CollectorError> {
        self.with_system(|sys| {
            sys.refresh_memory();
            let total = sys.total_memory();
            if total == 0 {
                return Err(CollectorError::Unavailable(
                    "memory totals not reported".to_string(),
                ));
            }
            let used = sys.used_memory();
            Ok(MemoryMetrics {
                total,
                used,
                free: sys.free_memory(),
                usage_percent: percent(used, total),
                swap_total: sys.total_swap(),
                swap_used: sys.used_swap(),
                swap_free: sys.free_swap(),
            })
        })
    }

    async fn disk(&self) -> Result<DiskMetrics, CollectorError> {
        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == std::path::Path::new(ROOT_MOUNT))
            .ok_or_else(|| {
                CollectorError::Unavailable(format!("no disk mounted at {ROOT_MOUNT}"))
            })?;

        let total = root.total_space();
        let free = root.available_space();
        let used = total.saturating_sub(free);
        Ok(DiskMetrics {
            mount_point: ROOT_MOUNT.to_string(),
            total,
            used,
            free,
            usage_percent: percent(used, total),
        })
    }

    #[cfg(target_os = "linux")]
    async fn disk_counters(&self) -> Result<Vec<DiskCounters>, CollectorError> {
        let stats = procfs::diskstats()
            .map_err(|e| CollectorError::Unavailable(format!("/proc/diskstats: {e}")))?;
        Ok(stats.iter().filter_map(diskstat_counters).collect())
    }

    #[cfg(not(target_os = "linux"))]
    async fn disk_counters(&self) -> Result<Vec<DiskCounters>, CollectorError> {
        let disks = Disks::new_with_refreshed_list();
        let mut counters: Vec<DiskCounters> = Vec::new();
        for disk in disks.list() {
            let device = device_name(&disk.name().to_string_lossy());
            // A device mounted several times reports the same counters.
            if counters.iter().any(|c| c.device == device) {
                continue;
            }
            let usage = disk.usage();
            counters.push(DiskCounters {
                device,
                read_bytes: usage.total_read_bytes,
                write_bytes: usage.total_written_bytes,
                ..DiskCounters::default()
            });
        }
        Ok(counters)
    }

    async fn network_counters(&self) -> Result<NetworkCounters, CollectorError> {
        let networks = Networks::new_with_refreshed_list();
        if networks.list().is_empty() {
            return Err(CollectorError::Unavailable(
                "no network interface reported".to_string(),
            ));
        }

        let (bytes_sent, bytes_recv) = networks.list().values().fold((0u64, 0u64), |acc, data| {
            (
                acc.0.saturating_add(data.total_transmitted()),
                acc.1.saturating_add(data.total_received()),
            )
        });
        Ok(NetworkCounters {
            interface: ALL_INTERFACES.to_string(),
            bytes_sent,
            bytes_recv,
        })
    }

    async fn load(&self) -> Result<LoadMetrics, CollectorError> {
        let avg = System::load_average();
        Ok(LoadMetrics {
            load1: avg.one,
            load5: avg.five,
            load15: avg.fifteen,
        })
    }

    async fn host(&self) -> Result<HostMetrics, CollectorError> {
        let procs = self.with_system(|sys| {
            sys.refresh_processes(ProcessesToUpdate::All, true);
            sys.processes().len() as u64
        });

        Ok(HostMetrics {
            os: std::env::consts::OS.to_string(),
            platform: System::distribution_id(),
            platform_version: System::os_version().unwrap_or_default(),
            kernel_version: System::kernel_version().unwrap_or_default(),
            kernel_arch: System::cpu_arch(),
            uptime: System::uptime(),
            boot_time: System::boot_time(),
            procs,
        })
    }

    async fn temperatures(&self) -> Result<Vec<TemperatureMetrics>, CollectorError> {
        let components = Components::new_with_refreshed_list();
        let readings: Vec<TemperatureMetrics> = components
            .list()
            .iter()
            .filter_map(|component| {
                let celsius = f64::from(component.temperature()?);
                valid_temperature(celsius).then(|| TemperatureMetrics {
                    sensor_key: component.label().to_string(),
                    sensor_label: component.label().to_string(),
                    temperature: celsius,
                })
            })
            .collect();

        if !readings.is_empty() || !cfg!(target_os = "linux") {
            return Ok(readings);
        }

        match run_command("sensors", &["-A"], DEFAULT_COMMAND_TIMEOUT).await {
            Ok(output) => Ok(parse_sensors_output(&output)),
            Err(e) => {
                tracing::debug!(error = %e, "lm-sensors fallback unavailable");
                Ok(Vec::new())
            }
        }
    }
}

/// Sector size used by `/proc/diskstats`, independent of the device.
#[cfg(target_os = "linux")]
const DISKSTATS_SECTOR_BYTES: u64 = 512;

/// Counters of one `/proc/diskstats` entry. Devices that never completed a
/// read or a write are skipped.
#[cfg(target_os = "linux")]
fn diskstat_counters(stat: &procfs::DiskStat) -> Option<DiskCounters> {
    if stat.reads == 0 && stat.writes == 0 {
        return None;
    }
    Some(DiskCounters {
        device: device_name(&stat.name),
        read_bytes: stat.sectors_read.saturating_mul(DISKSTATS_SECTOR_BYTES),
        write_bytes: stat.sectors_written.saturating_mul(DISKSTATS_SECTOR_BYTES),
        read_count: stat.reads,
        write_count: stat.writes,
        read_time: stat.time_reading,
        write_time: stat.time_writing,
        io_time: stat.time_in_progress,
        iops_in_progress: stat.in_progress,
    })
}

/// Kernel device name: `/dev/vda` becomes `vda`.
fn device_name(raw: &str) -> String {
    raw.strip_prefix("/dev/").unwrap_or(raw).to_string()
}

/// Parse `sensors -A` output.
///
/// Lines without `:` name the current chip; `label: +NN.N°C ...` lines yield
/// readings keyed `<chip>_<label>`.
pub fn parse_sensors_output(output: &str) -> Vec<TemperatureMetrics> {
    let mut readings = Vec::new();
    let mut chip = "";

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((label, value)) = line.split_once(':') else {
            chip = line;
            continue;
        };
        let Some((number, _)) = value.split_once("°C") else {
            continue;
        };
        let Ok(temperature) = number.trim().trim_start_matches('+').parse::<f64>() else {
            continue;
        };

        let label = label.trim();
        readings.push(TemperatureMetrics {
            sensor_key: format!("{chip}_{label}"),
            sensor_label: label.to_string(),
            temperature,
        });
    }
    readings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sensors_output() {
        let output = "\
coretemp-isa-0000
Package id 0:  +45.0°C  (high = +80.0°C, crit = +100.0°C)
Core 0:        +43.5°C  (high = +80.0°C, crit = +100.0°C)

nvme-pci-0100
Composite:    +38.9°C  (low  = -273.1°C, high = +84.8°C)
fan1:         1200 RPM
";
        let readings = parse_sensors_output(output);

        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].sensor_key, "coretemp-isa-0000_Package id 0");
        assert_eq!(readings[0].sensor_label, "Package id 0");
        assert_eq!(readings[0].temperature, 45.0);
        assert_eq!(readings[1].temperature, 43.5);
        assert_eq!(readings[2].sensor_key, "nvme-pci-0100_Composite");
        assert_eq!(readings[2].temperature, 38.9);
    }

    #[test]
    fn test_parse_sensors_output_empty() {
        assert!(parse_sensors_output("").is_empty());
        assert!(parse_sensors_output("acpitz-acpi-0\n").is_empty());
    }

    #[test]
    fn test_temperature_range() {
        assert!(!valid_temperature(0.0));
        assert!(valid_temperature(0.5));
        assert!(valid_temperature(150.0));
        assert!(!valid_temperature(150.1));
    }

    #[test]
    fn test_device_name_strips_dev_prefix() {
        assert_eq!(device_name("/dev/vda"), "vda");
        assert_eq!(device_name("/dev/mapper/root"), "mapper/root");
        assert_eq!(device_name("nvme0n1"), "nvme0n1");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_diskstat_counters() {
        let line = "253 0 vda 15230 4102 2432624 9876 48211 30120 3081664 51234 2 40120 61110";
        let stat = procfs::DiskStat::from_line(line).unwrap();
        let counters = diskstat_counters(&stat).unwrap();

        assert_eq!(counters.device, "vda");
        assert_eq!(counters.read_count, 15230);
        assert_eq!(counters.write_count, 48211);
        assert_eq!(counters.read_bytes, 2432624 * 512);
        assert_eq!(counters.write_bytes, 3081664 * 512);
        assert_eq!(counters.read_time, 9876);
        assert_eq!(counters.write_time, 51234);
        assert_eq!(counters.iops_in_progress, 2);
        assert_eq!(counters.io_time, 40120);

        let idle = procfs::DiskStat::from_line(" 7 0 loop0 0 0 0 0 0 0 0 0 0 0 0").unwrap();
        assert!(diskstat_counters(&idle).is_none());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_disk_counters_use_kernel_names() {
        let Ok(counters) = SystemFacts::new().disk_counters().await else {
            // No /proc/diskstats in this sandbox.
            return;
        };
        for counter in counters {
            assert!(!counter.device.starts_with("/dev/"), "{}", counter.device);
            assert!(counter.read_count + counter.write_count > 0);
        }
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(25, 100), 25.0);
    }

    #[tokio::test]
    async fn test_load_and_host_facts() {
        let facts = SystemFacts::new();

        let load = facts.load().await.unwrap();
        assert!(load.load1 >= 0.0);

        let host = facts.host().await.unwrap();
        assert_eq!(host.os, std::env::consts::OS);
        assert!(!host.kernel_arch.is_empty());
    }
}
