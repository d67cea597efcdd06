//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::ScanError;
use crate::beacon::APPLE_COMPANY_ID;
use crate::pipeline::Pipeline;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Apple company id as it appears on air (little-endian).
const APPLE_COMPANY_ID_BYTES: [u8; 2] = APPLE_COMPANY_ID.to_le_bytes();

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
const MANUFACTURER_DATA_TYPE: u8 = 0xff;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start a passive scan for Apple manufacturer data.
///
/// Every matching advertisement is handed to [`Pipeline::on_frame`] from the
/// spawned task until `stop` is cancelled.
pub async fn start_scan(
    pipeline: Arc<Pipeline>,
    stop: CancellationToken,
) -> Result<JoinHandle<()>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    info!(adapter = adapter.name(), "Scanning for beacons");

    let pattern = Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: APPLE_COMPANY_ID_BYTES.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    // The task owns all Bluetooth state so the monitor stays registered
    Ok(tokio::spawn(async move {
        let _session = session;
        let _monitor_manager = monitor_manager;

        loop {
            let event = tokio::select! {
                _ = stop.cancelled() => break,
                event = monitor_handle.next() => event,
            };
            let Some(event) = event else { break };
            if let MonitorEvent::DeviceFound(device_id) = event
                && let Err(e) = process_device(&adapter, device_id.device, &pipeline).await
            {
                debug!(error = %e, "Failed to read advertisement");
            }
        }
        debug!("Bluetooth scan stopped");
    }))
}

async fn process_device(
    adapter: &Adapter,
    address: Address,
    pipeline: &Pipeline,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;

    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(());
    };
    if let Some(data) = manufacturer_data.get(&APPLE_COMPANY_ID) {
        pipeline.on_frame(data);
    }
    Ok(())
}
