//! `tilt-relay` library.
//!
//! Receives Tilt hydrometer beacons, turns them into calibrated readings and
//! relays them to metrics, storage and brewing-service sinks.
//!
//! The binary (`src/main.rs`) is responsible for logging setup, signals and
//! process exit codes. The pipeline itself lives in [`crate::app`] where it can
//! be tested deterministically with an injected scanner and injected sinks.

pub mod app;
pub mod beacon;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod rate_limit;
pub mod reading;
pub mod registry;
pub mod scanner;
pub mod sink;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use beacon::{BeaconId, DecodeError, RawAdvertisement, decode_ibeacon};
pub use config::Config;
pub use dispatch::{Dispatcher, PipelineState, StopReason};
pub use pipeline::{Ingest, Pipeline};
pub use rate_limit::{Admission, RateLimiter, parse_duration};
pub use reading::{CalibrationProfile, Reading, ValidityGate, normalize};
pub use registry::DeviceRegistry;
pub use scanner::{Backend, ScanError};
pub use sink::{LineProtocolFormatter, Sink, SinkError};
