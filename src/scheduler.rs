//! Collection Scheduler
//!
//! Drives the agent after startup:
//! - **Startup**: load the stored identity or register once and persist it
//! - **Metrics ticks**: collect host metrics, run probes, submit one batch
//! - **Heartbeat ticks**: send a liveness signal, independent of metrics
//!
//! Both tick sources and the shutdown signal are multiplexed in a single
//! loop. Each tick is handled to completion before the next one is
//! considered, except that shutdown abandons an in-flight cycle. Missed
//! metrics ticks are skipped, so a slow cycle never overlaps the next one,
//! and a heartbeat that fell due during a cycle is sent right after it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::collector::device::NvidiaSmi;
use crate::collector::probe::ProbeExecutor;
use crate::collector::system::SystemFacts;
use crate::collector::{CollectorError, MetricsCollector};
use crate::config::{
    AgentConfig, ConfigError, DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_INTERVAL_SECS,
};
use crate::identity::{AgentIdentity, IdentityError, IdentityStore};
use crate::metrics::{MetricEnvelope, MetricPayload};
use crate::transport::{RegistrationInfo, Transport, TransportError};

/// Errors that stop the agent.
///
/// Everything that can go wrong inside a running loop is logged instead.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("registration failed: {0}")]
    Registration(#[source] TransportError),

    #[error("collector setup failed: {0}")]
    Collector(#[from] CollectorError),
}

enum Tick {
    Metrics,
    Heartbeat,
}

/// Periodic metrics and heartbeat loop for one agent.
pub struct CollectionScheduler {
    transport: Arc<dyn Transport>,
    store: IdentityStore,
    collector: MetricsCollector,
    probes: ProbeExecutor,
    registration: RegistrationInfo,
    metrics_interval: Duration,
    heartbeat_interval: Duration,
}

impl std::fmt::Debug for CollectionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionScheduler")
            .field("identity_file", &self.store.path())
            .field("metrics_interval", &self.metrics_interval)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish_non_exhaustive()
    }
}

impl CollectionScheduler {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: IdentityStore,
        collector: MetricsCollector,
        probes: ProbeExecutor,
        registration: RegistrationInfo,
    ) -> Self {
        Self {
            transport,
            store,
            collector,
            probes,
            registration,
            metrics_interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
        }
    }

    /// Build a scheduler backed by the host's own fact sources.
    ///
    /// # Errors
    /// Returns `AgentError::Collector` if the probe HTTP client cannot be built.
    pub fn from_config(
        config: &AgentConfig,
        transport: Arc<dyn Transport>,
        store: IdentityStore,
    ) -> Result<Self, AgentError> {
        let collector = MetricsCollector::new(SystemFacts::new(), NvidiaSmi::new());
        let probes = ProbeExecutor::new()?;
        let registration = RegistrationInfo::detect(&config.agent);

        Ok(Self::new(transport, store, collector, probes, registration).with_intervals(
            config.collector.metrics_interval(),
            config.collector.heartbeat_interval(),
        ))
    }

    /// Override the tick periods. Zero periods are rejected by [`Self::run`].
    pub fn with_intervals(mut self, metrics: Duration, heartbeat: Duration) -> Self {
        self.metrics_interval = metrics;
        self.heartbeat_interval = heartbeat;
        self
    }

    /// Load the stored identity, registering once if there is none.
    ///
    /// # Errors
    /// Fails if the identity file is unreadable or registration fails.
    /// A failure to persist a fresh identity is only logged.
    pub async fn initialize(&self) -> Result<AgentIdentity, AgentError> {
        if let Some(identity) = self.store.load()? {
            tracing::info!(agent_id = %identity, "Loaded agent identity");
            return Ok(identity);
        }

        tracing::info!(
            hostname = %self.registration.hostname,
            ip = %self.registration.ip,
            "No stored identity, registering agent"
        );
        let identity = self
            .transport
            .register(&self.registration)
            .await
            .map_err(AgentError::Registration)?;

        match self.store.save(&identity) {
            Ok(()) => tracing::info!(
                agent_id = %identity,
                path = %self.store.path().display(),
                "Agent registered"
            ),
            Err(e) => tracing::warn!(
                agent_id = %identity,
                error = %e,
                "Agent registered but identity could not be saved"
            ),
        }
        Ok(identity)
    }

    /// Collect host metrics and probe results into one batch.
    pub async fn collect_batch(&self, identity: &AgentIdentity) -> Vec<MetricEnvelope> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let mut batch = self.collector.collect(timestamp).await;

        let definitions = match self.transport.fetch_probe_definitions(identity).await {
            Ok(definitions) => definitions,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to fetch monitor tasks, skipping probes");
                Vec::new()
            }
        };

        if !definitions.is_empty() {
            tracing::debug!(count = definitions.len(), "Running monitor tasks");
            let results = self.probes.execute_all(&definitions).await;
            batch.extend(
                results
                    .into_iter()
                    .map(|r| MetricEnvelope::new(MetricPayload::Monitor(r), timestamp)),
            );
        }

        batch
    }

    /// Run one metrics cycle. Returns the number of envelopes submitted.
    pub async fn run_metrics_cycle(&self, identity: &AgentIdentity) -> usize {
        let batch = self.collect_batch(identity).await;
        if batch.is_empty() {
            tracing::debug!("Nothing collected this cycle");
            return 0;
        }

        match self.transport.report_metrics(identity, &batch).await {
            Ok(()) => {
                tracing::info!("Reported {} metrics", batch.len());
                batch.len()
            }
            Err(e) => {
                tracing::warn!(count = batch.len(), error = %e, "Failed to report metrics");
                0
            }
        }
    }

    /// Send one heartbeat. Failures are logged only.
    pub async fn send_heartbeat(&self, identity: &AgentIdentity) {
        match self.transport.heartbeat(identity).await {
            Ok(()) => tracing::debug!(agent_id = %identity, "Heartbeat sent"),
            Err(e) => tracing::warn!(agent_id = %identity, error = %e, "Heartbeat failed"),
        }
    }

    /// Initialize, then run both tick sources until `shutdown` resolves.
    ///
    /// # Errors
    /// Only startup failures are returned: zero tick periods, or the
    /// failures of [`Self::initialize`].
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), AgentError> {
        if self.metrics_interval.is_zero() || self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ValidationError(format!(
                "tick periods must be positive (metrics: {:?}, heartbeat: {:?})",
                self.metrics_interval, self.heartbeat_interval
            ))
            .into());
        }

        tokio::pin!(shutdown);

        let identity = tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested before startup completed");
                return Ok(());
            }
            identity = self.initialize() => identity?,
        };

        let mut metrics = tokio::time::interval(self.metrics_interval);
        metrics.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            agent_id = %identity,
            metrics_interval_secs = self.metrics_interval.as_secs_f64(),
            heartbeat_interval_secs = self.heartbeat_interval.as_secs_f64(),
            "Collection started"
        );

        loop {
            let tick = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = metrics.tick() => Tick::Metrics,
                _ = heartbeat.tick() => Tick::Heartbeat,
            };

            let completed = match tick {
                Tick::Metrics => {
                    let started = Instant::now();
                    let completed =
                        until_shutdown(shutdown.as_mut(), self.run_metrics_cycle(&identity)).await;
                    let took = started.elapsed();
                    if completed && took > self.metrics_interval {
                        tracing::warn!(
                            took_ms = took.as_millis() as u64,
                            interval_ms = self.metrics_interval.as_millis() as u64,
                            "Metrics cycle overran its interval, skipping missed ticks"
                        );
                    }

                    // A heartbeat that fell due during the cycle goes out before
                    // the next metrics tick is taken.
                    if completed && heartbeat.tick().now_or_never().is_some() {
                        until_shutdown(shutdown.as_mut(), self.send_heartbeat(&identity)).await
                    } else {
                        completed
                    }
                }
                Tick::Heartbeat => {
                    until_shutdown(shutdown.as_mut(), self.send_heartbeat(&identity)).await
                }
            };

            if !completed {
                tracing::info!("Shutdown requested, abandoning in-flight cycle");
                break;
            }
        }

        tracing::info!("Collection stopped");
        Ok(())
    }
}

/// Drive `work` unless `shutdown` resolves first. Returns whether `work` finished.
async fn until_shutdown<S, W>(shutdown: Pin<&mut S>, work: W) -> bool
where
    S: Future<Output = ()>,
    W: Future,
{
    tokio::select! {
        biased;
        _ = shutdown => false,
        _ = work => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::device::{DeviceQuery, DeviceReading, DeviceStaticInfo};
    use crate::collector::probe::{ProbeDefinition, ProbeKind, ProbeStatus};
    use crate::collector::{DiskCounters, FactSource, NetworkCounters};
    use crate::metrics::{
        CpuMetrics, DiskMetrics, HostMetrics, LoadMetrics, MemoryMetrics, MetricType,
        TemperatureMetrics,
    };
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports CPU only; every other category is unavailable.
    struct CpuOnly;

    fn unavailable<T>() -> Result<T, CollectorError> {
        Err(CollectorError::Unavailable("not in test".to_string()))
    }

    #[async_trait::async_trait]
    impl FactSource for CpuOnly {
        async fn cpu(&self) -> Result<CpuMetrics, CollectorError> {
            Ok(CpuMetrics {
                usage_percent: 3.0,
                logical_cores: 2,
                physical_cores: 1,
                model_name: "Test CPU".to_string(),
            })
        }

        async fn memory(&self) -> Result<MemoryMetrics, CollectorError> {
            unavailable()
        }

        async fn disk(&self) -> Result<DiskMetrics, CollectorError> {
            unavailable()
        }

        async fn disk_counters(&self) -> Result<Vec<DiskCounters>, CollectorError> {
            unavailable()
        }

        async fn network_counters(&self) -> Result<NetworkCounters, CollectorError> {
            unavailable()
        }

        async fn load(&self) -> Result<LoadMetrics, CollectorError> {
            unavailable()
        }

        async fn host(&self) -> Result<HostMetrics, CollectorError> {
            unavailable()
        }

        async fn temperatures(&self) -> Result<Vec<TemperatureMetrics>, CollectorError> {
            unavailable()
        }
    }

    struct NoGpu;

    #[async_trait::async_trait]
    impl DeviceQuery for NoGpu {
        async fn inventory(&self) -> Result<Vec<DeviceStaticInfo>, CollectorError> {
            Ok(Vec::new())
        }

        async fn readings(&self) -> Result<Vec<DeviceReading>, CollectorError> {
            unreachable!("readings queried without devices")
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        fail_register: bool,
        fail_fetch: bool,
        hang_fetch: bool,
        fetch_delay: Option<Duration>,
        fetches: AtomicUsize,
        probes: Vec<ProbeDefinition>,
        registrations: AtomicUsize,
        heartbeats: AtomicUsize,
        reports: Mutex<Vec<Vec<MetricEnvelope>>>,
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn register(
            &self,
            _info: &RegistrationInfo,
        ) -> Result<AgentIdentity, TransportError> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            if self.fail_register {
                return Err(TransportError::EmptyIdentity);
            }
            Ok(AgentIdentity::new("agent-new"))
        }

        async fn heartbeat(&self, _identity: &AgentIdentity) -> Result<(), TransportError> {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn report_metrics(
            &self,
            _identity: &AgentIdentity,
            batch: &[MetricEnvelope],
        ) -> Result<(), TransportError> {
            self.reports.lock().unwrap().push(batch.to_vec());
            Ok(())
        }

        async fn fetch_probe_definitions(
            &self,
            _identity: &AgentIdentity,
        ) -> Result<Vec<ProbeDefinition>, TransportError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            if self.hang_fetch {
                std::future::pending::<()>().await;
            }
            if self.fail_fetch {
                return Err(TransportError::InvalidResponse("boom".to_string()));
            }
            Ok(self.probes.clone())
        }
    }

    fn registration() -> RegistrationInfo {
        RegistrationInfo {
            hostname: "test-host".to_string(),
            ip: "127.0.0.1".to_string(),
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
            version: "0.0.0".to_string(),
            name: None,
        }
    }

    fn scheduler(transport: Arc<FakeTransport>, store: IdentityStore) -> CollectionScheduler {
        CollectionScheduler::new(
            transport,
            store,
            MetricsCollector::new(CpuOnly, NoGpu),
            ProbeExecutor::new().unwrap(),
            registration(),
        )
    }

    #[tokio::test]
    async fn test_stored_identity_skips_registration() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join(".agent_id"));
        store.save(&AgentIdentity::new("agent-7")).unwrap();

        let transport = Arc::new(FakeTransport::default());
        let identity = scheduler(transport.clone(), store).initialize().await.unwrap();

        assert_eq!(identity.id(), "agent-7");
        assert_eq!(transport.registrations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_registration_persists_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join(".agent_id"));

        let transport = Arc::new(FakeTransport::default());
        let identity = scheduler(transport.clone(), store.clone())
            .initialize()
            .await
            .unwrap();

        assert_eq!(identity.id(), "agent-new");
        assert_eq!(transport.registrations.load(Ordering::SeqCst), 1);
        assert_eq!(store.load().unwrap(), Some(identity));
    }

    #[tokio::test]
    async fn test_registration_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport {
            fail_register: true,
            ..FakeTransport::default()
        });
        let sched = scheduler(transport.clone(), IdentityStore::new(dir.path().join("id")));

        let err = sched.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, AgentError::Registration(_)));
        assert!(transport.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_means_no_probes() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport {
            fail_fetch: true,
            probes: vec![ProbeDefinition::new("m-1", ProbeKind::Tcp, "127.0.0.1:1")],
            ..FakeTransport::default()
        });
        let sched = scheduler(transport.clone(), IdentityStore::new(dir.path().join("id")));

        let sent = sched.run_metrics_cycle(&AgentIdentity::new("a")).await;
        assert_eq!(sent, 1);

        let reports = transport.reports.lock().unwrap();
        assert_eq!(reports[0][0].metric_type(), MetricType::Cpu);
    }

    #[tokio::test]
    async fn test_probe_results_follow_host_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport {
            probes: vec![
                ProbeDefinition::new("m-1", ProbeKind::Other("icmp".to_string()), "10.0.0.1"),
                ProbeDefinition::new("m-2", ProbeKind::Other("dns".to_string()), "example.com"),
            ],
            ..FakeTransport::default()
        });
        let sched = scheduler(transport.clone(), IdentityStore::new(dir.path().join("id")));

        let batch = sched.collect_batch(&AgentIdentity::new("a")).await;
        let types: Vec<_> = batch.iter().map(|e| e.metric_type()).collect();
        assert_eq!(types, [MetricType::Cpu, MetricType::Monitor, MetricType::Monitor]);

        let ids: Vec<_> = batch
            .iter()
            .filter_map(|e| match &e.payload {
                MetricPayload::Monitor(r) => Some((r.probe_id.clone(), r.status)),
                _ => None,
            })
            .collect();
        assert_eq!(
            ids,
            [
                ("m-1".to_string(), ProbeStatus::Down),
                ("m-2".to_string(), ProbeStatus::Down)
            ]
        );
        assert!(batch.iter().all(|e| e.timestamp == batch[0].timestamp));
    }

    #[tokio::test]
    async fn test_run_ticks_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("id"));
        store.save(&AgentIdentity::new("agent-1")).unwrap();

        let transport = Arc::new(FakeTransport::default());
        let sched = scheduler(transport.clone(), store)
            .with_intervals(Duration::from_millis(20), Duration::from_millis(10));

        sched
            .run(tokio::time::sleep(Duration::from_millis(150)))
            .await
            .unwrap();

        assert!(transport.heartbeats.load(Ordering::SeqCst) >= 2);
        assert!(transport.reports.lock().unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_in_flight_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("id"));
        store.save(&AgentIdentity::new("agent-1")).unwrap();

        let transport = Arc::new(FakeTransport {
            hang_fetch: true,
            ..FakeTransport::default()
        });
        let sched = scheduler(transport.clone(), store)
            .with_intervals(Duration::from_millis(10), Duration::from_secs(3600));

        tokio::time::timeout(
            Duration::from_secs(5),
            sched.run(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .expect("run did not observe shutdown")
        .unwrap();

        assert!(transport.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeats_continue_when_cycles_overrun() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("id"));
        store.save(&AgentIdentity::new("agent-1")).unwrap();

        let transport = Arc::new(FakeTransport {
            fetch_delay: Some(Duration::from_millis(250)),
            ..FakeTransport::default()
        });
        let sched = scheduler(transport.clone(), store)
            .with_intervals(Duration::from_millis(100), Duration::from_millis(50));

        sched
            .run(tokio::time::sleep(Duration::from_millis(1200)))
            .await
            .unwrap();

        let cycles = transport.fetches.load(Ordering::SeqCst);
        let heartbeats = transport.heartbeats.load(Ordering::SeqCst);
        assert!(cycles >= 2, "cycles={cycles}");
        assert!(heartbeats >= 2, "cycles={cycles} heartbeats={heartbeats}");
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::default());
        let sched = scheduler(transport.clone(), IdentityStore::new(dir.path().join("id")))
            .with_intervals(Duration::ZERO, Duration::from_secs(1));

        let err = sched.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, AgentError::Config(ConfigError::ValidationError(_))));
        assert_eq!(transport.registrations.load(Ordering::SeqCst), 0);
    }
}
