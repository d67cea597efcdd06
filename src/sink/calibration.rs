//! Calibration helper sink used by `--calibrate`.

use super::{Sink, SinkError, SinkFuture};
use crate::reading::{Reading, round_half_even};
use tracing::info;

/// Offsets to copy into `[calibration.<color>]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationOffsets {
    pub temp_offset: f64,
    pub gravity_offset: f64,
}

/// Compares a device's readings with reference values measured by hand and
/// logs the offsets that would make them agree.
pub struct CalibrationSink {
    name: String,
    color: String,
    actual_temp: f64,
    actual_gravity: f64,
    last: Option<CalibrationOffsets>,
}

impl CalibrationSink {
    /// At least one of the reference values must be positive.
    pub fn new(color: &str, actual_temp: f64, actual_gravity: f64) -> Result<Self, SinkError> {
        if actual_temp <= 0.0 && actual_gravity <= 0.0 {
            return Err(SinkError::Setup(
                "provide --actual-temp, --actual-gravity, or both".to_string(),
            ));
        }
        let color = color.to_lowercase();
        Ok(Self {
            name: format!("Calibration ({color})"),
            color,
            actual_temp,
            actual_gravity,
            last: None,
        })
    }

    pub fn offsets(&self, reading: &Reading) -> CalibrationOffsets {
        CalibrationOffsets {
            temp_offset: round_half_even(self.actual_temp - reading.temp_fahrenheit, 2),
            gravity_offset: round_half_even(self.actual_gravity - reading.gravity, 4),
        }
    }

    /// Offsets computed from the most recent matching reading.
    pub fn last_offsets(&self) -> Option<CalibrationOffsets> {
        self.last
    }
}

impl Sink for CalibrationSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write<'a>(&'a mut self, reading: &'a Reading) -> SinkFuture<'a, ()> {
        if reading.color == self.color {
            let offsets = self.offsets(reading);
            info!(
                color = %reading.color,
                gravity = reading.gravity,
                gravity_offset = offsets.gravity_offset,
                temp_fahrenheit = reading.temp_fahrenheit,
                temp_offset = offsets.temp_offset,
                "Calibration"
            );
            self.last = Some(offsets);
        }
        Box::pin(async { Ok(()) })
    }
}
