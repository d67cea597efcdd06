//! Calibrated hydrometer readings.
//!
//! A [`Reading`] is built from the raw `major`/`minor` beacon fields by
//! [`normalize`] and then checked against the configured physical ranges by a
//! [`ValidityGate`]. Only readings that pass both range checks are queued.

use serde::{Deserialize, Serialize, Serializer};
use std::time::SystemTime;

/// Factor converting a drop in specific gravity to alcohol by volume.
const ABV_FACTOR: f64 = 131.25;

/// Scale applied to the relative gravity drop for apparent attenuation.
const ATTENUATION_FACTOR: f64 = 2000.0;

/// Per-device calibration, keyed by color in the configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationProfile {
    /// Added to the broadcast temperature (degrees Fahrenheit)
    pub temp_offset: f64,
    /// Added to the broadcast specific gravity
    pub gravity_offset: f64,
    /// Gravity at pitch time, needed for ABV and attenuation
    pub original_gravity: Option<f64>,
    /// Human readable name of the batch, e.g. "Pale Ale"
    pub name: Option<String>,
}

/// A hydrometer reading flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Logical device name (Tilt color)
    pub color: String,
    /// Display name, the batch name when configured, otherwise the color
    pub name: String,
    /// Capture time
    #[serde(serialize_with = "serialize_rfc3339")]
    pub timestamp: SystemTime,
    /// Calibrated temperature in degrees Fahrenheit
    pub temp_fahrenheit: f64,
    /// Calibrated temperature in whole degrees Celsius
    pub temp_celsius: i32,
    /// Calibrated specific gravity
    pub gravity: f64,
    /// Original gravity baseline, if configured
    pub original_gravity: Option<f64>,
    pub alcohol_by_volume: f64,
    pub apparent_attenuation: f64,
    pub temp_valid: bool,
    pub gravity_valid: bool,
}

impl Reading {
    /// Whether the reading may be enqueued for dispatch.
    pub fn is_admissible(&self) -> bool {
        self.temp_valid && self.gravity_valid
    }

    /// JSON representation used by the console log, file and webhook sinks.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn serialize_rfc3339<S: Serializer>(time: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    let time: chrono::DateTime<chrono::Utc> = (*time).into();
    s.serialize_str(&time.to_rfc3339())
}

/// Round half-to-even at the given number of decimal places.
///
/// Rounds the exact binary value, so 2.675 (stored as 2.67499...) becomes
/// 2.67. Float formatting is exact and breaks ties to even.
pub fn round_half_even(value: f64, places: usize) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{value:.places$}").parse().unwrap_or(value)
}

/// Convert Fahrenheit to whole degrees Celsius.
pub fn celsius(fahrenheit: f64) -> i32 {
    ((fahrenheit - 32.0) * 5.0 / 9.0).round_ties_even() as i32
}

/// Convert the broadcast `minor` field to specific gravity (1035 -> 1.035).
pub fn decimal_gravity(minor: u16) -> f64 {
    f64::from(minor) / 1000.0
}

/// Alcohol by volume, zero without a baseline.
pub fn alcohol_by_volume(original_gravity: Option<f64>, gravity: f64) -> f64 {
    match original_gravity {
        Some(og) => round_half_even((og - gravity) * ABV_FACTOR, 2),
        None => 0.0,
    }
}

/// Apparent attenuation, zero without a (non-zero) baseline.
pub fn apparent_attenuation(original_gravity: Option<f64>, gravity: f64) -> f64 {
    match original_gravity {
        Some(og) if og != 0.0 => round_half_even(((og - gravity) / og) * ATTENUATION_FACTOR, 2),
        _ => 0.0,
    }
}

/// Build a calibrated [`Reading`] from raw beacon fields.
///
/// The validity flags are left unset; run the result through a
/// [`ValidityGate`] before queueing it.
pub fn normalize(
    color: &str,
    major: u16,
    minor: u16,
    profile: &CalibrationProfile,
    timestamp: SystemTime,
) -> Reading {
    let temp_fahrenheit = f64::from(major) + profile.temp_offset;
    let gravity = decimal_gravity(minor) + profile.gravity_offset;

    Reading {
        color: color.to_string(),
        name: profile.name.clone().unwrap_or_else(|| color.to_string()),
        timestamp,
        temp_fahrenheit,
        temp_celsius: celsius(temp_fahrenheit),
        gravity,
        original_gravity: profile.original_gravity,
        alcohol_by_volume: alcohol_by_volume(profile.original_gravity, gravity),
        apparent_attenuation: apparent_attenuation(profile.original_gravity, gravity),
        temp_valid: false,
        gravity_valid: false,
    }
}

/// An open interval: both bounds are excluded.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidRange {
    pub min: f64,
    pub max: f64,
}

impl ValidRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min < value && value < self.max
    }
}

/// Physical range checks applied to every normalized reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidityGate {
    pub temperature: ValidRange,
    pub gravity: ValidRange,
}

impl ValidityGate {
    /// Default temperature range in degrees Fahrenheit (freezing to boiling).
    pub const DEFAULT_TEMP_RANGE: ValidRange = ValidRange::new(32.0, 212.0);
    /// Default specific gravity range.
    pub const DEFAULT_GRAVITY_RANGE: ValidRange = ValidRange::new(0.7, 1.4);

    pub fn new(temperature: ValidRange, gravity: ValidRange) -> Self {
        Self {
            temperature,
            gravity,
        }
    }

    /// Set both validity flags; no other field is touched.
    pub fn apply(&self, mut reading: Reading) -> Reading {
        reading.temp_valid = self.temperature.contains(reading.temp_fahrenheit);
        reading.gravity_valid = self.gravity.contains(reading.gravity);
        reading
    }
}

impl Default for ValidityGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TEMP_RANGE, Self::DEFAULT_GRAVITY_RANGE)
    }
}
