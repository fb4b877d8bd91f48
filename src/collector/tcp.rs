//! TCP probes for checking TCP endpoints.
//!
//! - [`TcpProbe`]: TCP connect reachability and latency check

mod probe;

pub use probe::TcpProbe;
