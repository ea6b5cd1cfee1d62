//! Library crate for recon-scan-rs: a concurrent network-probe engine with race-free
//! statistics, cooperative cancellation and ordered endpoint fallback.
pub mod advisor;
pub mod cancel;
pub mod dispatcher;
pub mod enrich;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod pinger;
pub mod privilege;
pub mod probe;
pub mod report;
pub mod rotation;
pub mod service;
pub mod session;
pub mod stats;
pub mod targets;
pub mod tls;
pub mod types;
