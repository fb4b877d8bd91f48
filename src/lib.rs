//! Oculus Agent - Host Telemetry Library
//!
//! This crate provides the sampling, rate-derivation and active-probe engine of
//! the Oculus host agent. It can be embedded by other Rust projects, or run as
//! a standalone binary with the `oculus-agent` executable.
//!
//! # Architecture
//!
//! - **Collector**: Raw fact acquisition, counter-to-rate derivation and
//!   one-time accelerator discovery
//! - **Probes**: HTTP/HTTPS and TCP reachability checks defined remotely
//! - **Scheduler**: Metrics and heartbeat timers, batch assembly and delivery
//! - **Transport**: JSON-over-HTTP client for the remote collector
//! - **Identity**: Durable agent identity token
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oculus_agent::{AgentConfig, CollectionScheduler, HttpTransport, IdentityStore};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentConfig::load("config.yaml")?;
//! let transport = Arc::new(HttpTransport::new(&config.server)?);
//! let store = IdentityStore::new(&config.agent.identity_file);
//!
//! let scheduler = CollectionScheduler::from_config(&config, transport, store)?;
//! scheduler.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod identity;
pub mod metrics;
pub mod scheduler;
pub mod transport;

pub use collector::device::{DeviceQuery, DeviceReading, DeviceStaticCache, DeviceStaticInfo};
pub use collector::probe::{ProbeDefinition, ProbeExecutor, ProbeKind, ProbeResult, ProbeStatus};
pub use collector::rate::RateTracker;
pub use collector::system::SystemFacts;
pub use collector::{CollectorError, FactSource, MetricsCollector};
pub use config::{AgentConfig, ConfigError};
pub use identity::{AgentIdentity, IdentityError, IdentityStore};
pub use metrics::{MetricEnvelope, MetricPayload, MetricType};
pub use scheduler::{AgentError, CollectionScheduler};
pub use transport::{HttpTransport, RegistrationInfo, Transport, TransportError};
