//! Bounded-concurrency TCP connect scanning of a single host.
//!
//! [`scan`] resolves a host once, issues one probe per port with at most
//! `max_in_flight` connecting at a time, and returns a verdict for every port.
pub mod collector;
pub mod config;
pub mod error;
pub mod limits;
pub mod logging;
pub mod ports;
pub mod probe;
pub mod progress;
pub mod scanner;
pub mod target;
pub mod types;

pub use collector::ResultCollector;
pub use config::ScanConfig;
pub use error::{CollectError, ConfigError, ScanError};
pub use ports::ScanOrder;
pub use probe::{Connector, Probe, ProbeState, TcpConnector};
pub use progress::{ProgressSnapshot, ScanProgress};
pub use scanner::{scan, scan_with_cancel, ScanOptions, Scanner};
pub use target::Target;
pub use types::{Outcome, ScanResult, Summary, Verdict};
