//! Producer side of the pipeline: decode, resolve, normalize, gate, enqueue.
//!
//! [`Pipeline`] holds everything the scan callback needs. It is shared through
//! an `Arc` with whatever task or thread receives advertisements and never
//! blocks: a full queue drops the reading.

use crate::beacon::{RawAdvertisement, decode_ibeacon};
use crate::queue::QueueSender;
use crate::reading::{CalibrationProfile, ValidityGate, normalize};
use crate::registry::DeviceRegistry;
use std::collections::BTreeMap;
use std::time::SystemTime;
use tracing::{debug, info};

/// What happened to one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Manufacturer data was not an iBeacon frame
    NotABeacon,
    /// iBeacon from an identity the registry does not know
    UnknownDevice,
    /// Temperature or gravity outside the configured range
    OutOfRange,
    /// Queue was full, reading discarded
    Dropped,
    Enqueued,
}

/// Shared context for the producer path.
#[derive(Debug)]
pub struct Pipeline {
    registry: DeviceRegistry,
    calibration: BTreeMap<String, CalibrationProfile>,
    gate: ValidityGate,
    queue: QueueSender,
}

impl Pipeline {
    pub fn new(
        registry: DeviceRegistry,
        calibration: BTreeMap<String, CalibrationProfile>,
        gate: ValidityGate,
        queue: QueueSender,
    ) -> Self {
        Self {
            registry,
            calibration,
            gate,
            queue,
        }
    }

    /// Handle raw Apple manufacturer data (company id already stripped).
    pub fn on_frame(&self, data: &[u8]) -> Ingest {
        match decode_ibeacon(data) {
            Ok(advertisement) => self.on_advertisement(advertisement),
            Err(e) => {
                debug!(error = %e, len = data.len(), "Ignoring frame");
                Ingest::NotABeacon
            }
        }
    }

    /// Handle an already decoded advertisement, e.g. from the simulator.
    pub fn on_advertisement(&self, advertisement: RawAdvertisement) -> Ingest {
        self.on_advertisement_at(advertisement, SystemTime::now())
    }

    pub fn on_advertisement_at(
        &self,
        advertisement: RawAdvertisement,
        timestamp: SystemTime,
    ) -> Ingest {
        let Some(color) = self.registry.resolve(&advertisement.id) else {
            return Ingest::UnknownDevice;
        };

        let default_profile = CalibrationProfile::default();
        let profile = self.calibration.get(color).unwrap_or(&default_profile);
        let reading = self.gate.apply(normalize(
            color,
            advertisement.major,
            advertisement.minor,
            profile,
            timestamp,
        ));

        if !reading.is_admissible() {
            info!(
                color,
                temp_fahrenheit = reading.temp_fahrenheit,
                gravity = reading.gravity,
                temp_valid = reading.temp_valid,
                gravity_valid = reading.gravity_valid,
                "Reading out of range, ignoring"
            );
            return Ingest::OutOfRange;
        }

        if self.queue.enqueue(reading) {
            Ingest::Enqueued
        } else {
            info!(color, depth = self.queue.len(), "Queue full, dropping reading");
            Ingest::Dropped
        }
    }

    pub fn queue(&self) -> &QueueSender {
        &self.queue
    }
}
