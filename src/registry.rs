//! Beacon identity to device color mapping.
//!
//! Every Tilt color broadcasts a fixed UUID. The registry is built once at
//! startup and only read afterwards.

use crate::beacon::BeaconId;
use std::collections::BTreeMap;

/// Color name used for synthetic traffic from the beacon simulator.
pub const SIMULATED: &str = "simulated";

/// Reserved identity used only by the beacon simulator.
pub const SIMULATED_ID: BeaconId = BeaconId([
    0xA4, 0x95, 0xFF, 0x99, 0xC5, 0xB1, 0x4B, 0x44, 0xB5, 0x12, 0x13, 0x70, 0xF0, 0x2D, 0x74, 0xDE,
]);

/// Known Tilt colors, indexed by the third byte of their UUID.
const TILT_COLORS: [(u8, &str); 8] = [
    (0x10, "red"),
    (0x20, "green"),
    (0x30, "black"),
    (0x40, "purple"),
    (0x50, "orange"),
    (0x60, "blue"),
    (0x70, "yellow"),
    (0x80, "pink"),
];

/// The UUID a Tilt of the given color byte broadcasts.
const fn tilt_id(color_byte: u8) -> BeaconId {
    BeaconId([
        0xA4, 0x95, 0xBB, color_byte, 0xC5, 0xB1, 0x4B, 0x44, 0xB5, 0x12, 0x13, 0x70, 0xF0, 0x2D,
        0x74, 0xDE,
    ])
}

/// A user supplied mapping from beacon id to device name.
#[derive(Debug, Clone)]
pub struct DeviceAlias {
    pub id: BeaconId,
    pub name: String,
}

/// Parse a device mapping in the format "UUID=NAME".
///
/// # Example
/// ```
/// use tilt_relay::registry::parse_device;
///
/// let alias = parse_device("a495bb99-c5b1-4b44-b512-1370f02d74de=spare").unwrap();
/// assert_eq!(alias.name, "spare");
/// ```
pub fn parse_device(src: &str) -> Result<DeviceAlias, String> {
    let (id, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid device: expected format UUID=NAME".to_string())?;
    let id = id.trim().parse().map_err(|e| format!("{e}"))?;
    Ok(DeviceAlias {
        id,
        name: name.trim().to_lowercase(),
    })
}

/// Static identity-to-color table.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: BTreeMap<BeaconId, String>,
}

impl DeviceRegistry {
    /// Registry with every Tilt color plus the simulation identity.
    pub fn tilt() -> Self {
        let mut devices: BTreeMap<BeaconId, String> = TILT_COLORS
            .iter()
            .map(|(byte, color)| (tilt_id(*byte), color.to_string()))
            .collect();
        devices.insert(SIMULATED_ID, SIMULATED.to_string());
        Self { devices }
    }

    /// Add extra mappings on top of the built-in table. Later entries win.
    pub fn with_devices(mut self, aliases: &[DeviceAlias]) -> Self {
        for alias in aliases {
            self.devices.insert(alias.id, alias.name.clone());
        }
        self
    }

    /// Look up the logical device name for a beacon identity.
    pub fn resolve(&self, id: &BeaconId) -> Option<&str> {
        self.devices.get(id).map(String::as_str)
    }

    /// Reverse lookup from device name to beacon identity.
    pub fn id_for(&self, name: &str) -> Option<BeaconId> {
        self.devices
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::tilt()
    }
}
