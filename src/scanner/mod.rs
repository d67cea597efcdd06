//! Advertisement sources.
//!
//! A scan backend runs on its own task and pushes everything it sees into the
//! shared [`Pipeline`]. Backends never wait on the dispatch loop; they stop when
//! their cancellation token fires.

#[cfg(feature = "bluer")]
pub mod bluer;
pub mod simulate;

use crate::pipeline::Pipeline;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// Synthetic readings from the reserved simulation beacon
    Simulate,
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(not(feature = "bluer"))]
        return Backend::Simulate;
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Simulate => write!(f, "simulate"),
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulate" | "simulated" => Ok(Backend::Simulate),
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            _ => Err(ScanError::BackendNotAvailable(s.to_string())),
        }
    }
}

/// Start the given backend feeding `pipeline` until `stop` is cancelled.
pub async fn start_scan(
    backend: Backend,
    pipeline: Arc<Pipeline>,
    stop: CancellationToken,
) -> Result<JoinHandle<()>, ScanError> {
    match backend {
        Backend::Simulate => Ok(simulate::start_scan(pipeline, stop)),
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(pipeline, stop).await,
    }
}
