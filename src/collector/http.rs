//! HTTP probes for checking HTTP/HTTPS endpoints.
//!
//! - [`HttpProbe`]: status, content and certificate-expiry check

mod probe;

pub use probe::HttpProbe;
