//! Collector Layer
//!
//! Acquires host facts, derives rates from cumulative counters, merges
//! cached accelerator inventory with fresh readings, and runs remotely
//! defined reachability probes.
//!
//! # Architecture
//!
//! - [`FactSource`]: Raw host fact acquisition (implemented by [`system::SystemFacts`])
//! - [`rate::RateTracker`]: Per-key counter-to-rate derivation
//! - [`device::DeviceStaticCache`]: One-time device discovery plus per-cycle readings
//! - [`probe::ProbeExecutor`]: HTTP/HTTPS and TCP probe dispatch
//! - [`MetricsCollector`]: Combines the above into one batch of envelopes
//!
//! # Example
//!
//! ```rust,no_run
//! use oculus_agent::collector::{MetricsCollector, device::NvidiaSmi, system::SystemFacts};
//!
//! # async fn run() {
//! let collector = MetricsCollector::new(SystemFacts::new(), NvidiaSmi::new());
//! let batch = collector.collect(chrono::Utc::now().timestamp_millis()).await;
//! println!("collected {} envelopes", batch.len());
//! # }
//! ```

pub mod device;
pub mod http;
mod host;
pub mod probe;
pub mod rate;
pub mod system;
pub mod tcp;
mod traits;

pub use host::MetricsCollector;
pub use traits::{
    CollectorError, DEFAULT_COMMAND_TIMEOUT, DiskCounters, FactSource, NetworkCounters,
};
