//! Per-cycle host metric assembly.

use std::time::Instant;

use crate::collector::device::{DeviceQuery, DeviceStaticCache};
use crate::collector::rate::RateTracker;
use crate::collector::traits::{CollectorError, DiskCounters, FactSource, NetworkCounters};
use crate::metrics::{DiskIoMetrics, MetricEnvelope, MetricPayload, MetricType, NetworkMetrics};

/// Collects every host metric category into envelopes.
///
/// Owns the rate state for network and disk counters and the device cache,
/// so both live exactly as long as the collector.
pub struct MetricsCollector {
    facts: Box<dyn FactSource>,
    rates: RateTracker,
    devices: DeviceStaticCache,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("rate_keys", &self.rates.len())
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

impl MetricsCollector {
    pub fn new(facts: impl FactSource, devices: impl DeviceQuery) -> Self {
        Self {
            facts: Box::new(facts),
            rates: RateTracker::new(),
            devices: DeviceStaticCache::new(devices),
        }
    }

    /// Collect all categories in a fixed order: cpu, memory, disk, disk_io,
    /// network, load, host, gpu, temperature.
    ///
    /// A category whose acquisition fails is logged and left out.
    pub async fn collect(&self, timestamp_ms: i64) -> Vec<MetricEnvelope> {
        let mut batch = Vec::new();
        let mut push =
            |payload: MetricPayload| batch.push(MetricEnvelope::new(payload, timestamp_ms));

        if let Some(cpu) = category(MetricType::Cpu, self.facts.cpu().await) {
            push(MetricPayload::Cpu(cpu));
        }
        if let Some(memory) = category(MetricType::Memory, self.facts.memory().await) {
            push(MetricPayload::Memory(memory));
        }
        if let Some(disk) = category(MetricType::Disk, self.facts.disk().await) {
            push(MetricPayload::Disk(disk));
        }
        if let Some(counters) = category(MetricType::DiskIo, self.facts.disk_counters().await) {
            let now = Instant::now();
            for counter in counters {
                push(MetricPayload::DiskIo(self.disk_io(counter, now)));
            }
        }
        if let Some(counters) = category(MetricType::Network, self.facts.network_counters().await)
        {
            push(MetricPayload::Network(self.network(counters, Instant::now())));
        }
        if let Some(load) = category(MetricType::Load, self.facts.load().await) {
            push(MetricPayload::Load(load));
        }
        if let Some(host) = category(MetricType::Host, self.facts.host().await) {
            push(MetricPayload::Host(host));
        }
        for gpu in self.devices.collect().await {
            push(MetricPayload::Gpu(gpu));
        }
        if let Some(readings) = category(MetricType::Temperature, self.facts.temperatures().await) {
            for reading in readings {
                push(MetricPayload::Temperature(reading));
            }
        }

        batch
    }

    fn disk_io(&self, counter: DiskCounters, now: Instant) -> DiskIoMetrics {
        let read_key = format!("disk:{}:read", counter.device);
        let write_key = format!("disk:{}:write", counter.device);
        DiskIoMetrics {
            read_bytes_rate: self.rates.whole_rate(&read_key, counter.read_bytes, now),
            write_bytes_rate: self.rates.whole_rate(&write_key, counter.write_bytes, now),
            device: counter.device,
            read_bytes: counter.read_bytes,
            write_bytes: counter.write_bytes,
            read_count: counter.read_count,
            write_count: counter.write_count,
            read_time: counter.read_time,
            write_time: counter.write_time,
            io_time: counter.io_time,
            iops_in_progress: counter.iops_in_progress,
        }
    }

    fn network(&self, counter: NetworkCounters, now: Instant) -> NetworkMetrics {
        let sent_key = format!("net:{}:sent", counter.interface);
        let recv_key = format!("net:{}:recv", counter.interface);
        NetworkMetrics {
            bytes_sent_rate: self.rates.whole_rate(&sent_key, counter.bytes_sent, now),
            bytes_recv_rate: self.rates.whole_rate(&recv_key, counter.bytes_recv, now),
            interface: counter.interface,
            bytes_sent_total: counter.bytes_sent,
            bytes_recv_total: counter.bytes_recv,
        }
    }
}

fn category<T>(metric_type: MetricType, result: Result<T, CollectorError>) -> Option<T> {
    result
        .inspect_err(|e| {
            tracing::warn!(metric_type = %metric_type, error = %e, "Metric acquisition failed")
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::device::{DeviceReading, DeviceStaticInfo};
    use crate::metrics::{
        CpuMetrics, DiskMetrics, HostMetrics, LoadMetrics, MemoryMetrics, TemperatureMetrics,
    };
    use std::sync::Mutex;

    /// Fact source with scripted counters and a failing memory category.
    #[derive(Default)]
    struct ScriptedFacts {
        bytes_sent: Mutex<Vec<u64>>,
    }

    #[async_trait::async_trait]
    impl FactSource for ScriptedFacts {
        async fn cpu(&self) -> Result<CpuMetrics, CollectorError> {
            Ok(CpuMetrics {
                usage_percent: 12.5,
                logical_cores: 8,
                physical_cores: 4,
                model_name: "Test CPU".to_string(),
            })
        }

        async fn memory(&self) -> Result<MemoryMetrics, CollectorError> {
            Err(CollectorError::Unavailable("meminfo unreadable".to_string()))
        }

        async fn disk(&self) -> Result<DiskMetrics, CollectorError> {
            Ok(DiskMetrics {
                mount_point: "/".to_string(),
                total: 100,
                used: 40,
                free: 60,
                usage_percent: 40.0,
            })
        }

        async fn disk_counters(&self) -> Result<Vec<DiskCounters>, CollectorError> {
            Ok(vec![
                DiskCounters {
                    device: "sda".to_string(),
                    read_bytes: 1_000,
                    write_bytes: 2_000,
                    read_count: 10,
                    write_count: 20,
                    ..DiskCounters::default()
                },
                DiskCounters {
                    device: "nvme0n1".to_string(),
                    read_bytes: 5,
                    write_bytes: 6,
                    ..DiskCounters::default()
                },
            ])
        }

        async fn network_counters(&self) -> Result<NetworkCounters, CollectorError> {
            let sent = self.bytes_sent.lock().unwrap().remove(0);
            Ok(NetworkCounters {
                interface: "all".to_string(),
                bytes_sent: sent,
                bytes_recv: 0,
            })
        }

        async fn load(&self) -> Result<LoadMetrics, CollectorError> {
            Ok(LoadMetrics {
                load1: 1.0,
                load5: 0.5,
                load15: 0.25,
            })
        }

        async fn host(&self) -> Result<HostMetrics, CollectorError> {
            Err(CollectorError::Timeout(std::time::Duration::from_secs(10)))
        }

        async fn temperatures(&self) -> Result<Vec<TemperatureMetrics>, CollectorError> {
            Ok(vec![TemperatureMetrics {
                sensor_key: "cpu_Core 0".to_string(),
                sensor_label: "Core 0".to_string(),
                temperature: 42.0,
            }])
        }
    }

    struct OneGpu;

    #[async_trait::async_trait]
    impl DeviceQuery for OneGpu {
        async fn inventory(&self) -> Result<Vec<DeviceStaticInfo>, CollectorError> {
            Ok(vec![DeviceStaticInfo {
                index: 0,
                name: "Tesla T4".to_string(),
                capacity_bytes: 1 << 34,
            }])
        }

        async fn readings(&self) -> Result<Vec<DeviceReading>, CollectorError> {
            Ok(vec![DeviceReading {
                index: 0,
                temperature: 50.0,
                utilization: 10.0,
                memory_used: 1,
                memory_free: 2,
                power_draw: 70.0,
                fan_speed: 30.0,
            }])
        }
    }

    #[tokio::test]
    async fn test_failed_categories_are_omitted() {
        let facts = ScriptedFacts {
            bytes_sent: Mutex::new(vec![100]),
        };
        let collector = MetricsCollector::new(facts, OneGpu);

        let batch = collector.collect(42).await;
        let types: Vec<_> = batch.iter().map(|e| e.metric_type()).collect();
        assert_eq!(
            types,
            [
                MetricType::Cpu,
                MetricType::Disk,
                MetricType::DiskIo,
                MetricType::DiskIo,
                MetricType::Network,
                MetricType::Load,
                MetricType::Gpu,
                MetricType::Temperature,
            ]
        );
        assert!(batch.iter().all(|e| e.timestamp == 42));

        let sda = batch.iter().find_map(|e| match &e.payload {
            MetricPayload::DiskIo(d) if d.device == "sda" => Some(d.clone()),
            _ => None,
        });
        let sda = sda.unwrap();
        assert_eq!((sda.read_count, sda.write_count), (10, 20));
    }

    #[tokio::test]
    async fn test_first_cycle_rates_are_zero_then_derived() {
        let facts = ScriptedFacts {
            bytes_sent: Mutex::new(vec![1_000, 1_000_000]),
        };
        let collector = MetricsCollector::new(facts, OneGpu);

        let network = |batch: &[MetricEnvelope]| {
            batch.iter().find_map(|e| match &e.payload {
                MetricPayload::Network(n) => Some(n.clone()),
                _ => None,
            })
        };

        let first = network(&collector.collect(1).await).unwrap();
        assert_eq!(first.bytes_sent_total, 1_000);
        assert_eq!(first.bytes_sent_rate, 0);

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let second = network(&collector.collect(2).await).unwrap();
        assert_eq!(second.bytes_sent_total, 1_000_000);
        assert!(second.bytes_sent_rate > 0);
        assert_eq!(second.bytes_recv_rate, 0);
    }
}
