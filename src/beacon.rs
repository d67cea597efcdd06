//! iBeacon advertisement decoding.
//!
//! Tilt hydrometers broadcast Apple iBeacon frames. The identity UUID tells
//! which color (device) sent the frame, `major` carries the temperature in
//! whole degrees Fahrenheit and `minor` the specific gravity times 1000.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Apple's Bluetooth company identifier, under which iBeacon data is published.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// iBeacon type (0x02) and remaining length (0x15 = 21) prefix.
pub const IBEACON_PREFIX: [u8; 2] = [0x02, 0x15];

/// Prefix + UUID + major + minor. The trailing TX power byte is optional.
const MIN_FRAME_LEN: usize = 2 + 16 + 2 + 2;

/// A 16-byte beacon identity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BeaconId(pub [u8; 16]);

impl fmt::Display for BeaconId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Errors returned when parsing a beacon UUID string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseBeaconIdError {
    #[error("invalid beacon id: expected 32 hex digits, got {0}")]
    InvalidLength(usize),
    #[error("invalid beacon id: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for BeaconId {
    type Err = ParseBeaconIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != '-').collect();
        if !digits.is_ascii() {
            return Err(ParseBeaconIdError::InvalidHex(digits));
        }
        if digits.len() != 32 {
            return Err(ParseBeaconIdError::InvalidLength(digits.len()));
        }

        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &digits[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| ParseBeaconIdError::InvalidHex(pair.to_string()))?;
        }

        Ok(BeaconId(bytes))
    }
}

impl From<[u8; 16]> for BeaconId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

/// A decoded iBeacon frame, before any device lookup or calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAdvertisement {
    pub id: BeaconId,
    pub major: u16,
    pub minor: u16,
}

/// Error type for frame decoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The frame is not an iBeacon advertisement (other radio traffic).
    #[error("Not a beacon frame")]
    NotABeaconFrame,
}

/// Decode Apple manufacturer data (company id already stripped) into a
/// [`RawAdvertisement`].
///
/// # Example
/// ```
/// use tilt_relay::beacon::decode_ibeacon;
///
/// let mut frame = vec![0x02, 0x15];
/// frame.extend_from_slice(&[0xA4, 0x95, 0xBB, 0x70, 0xC5, 0xB1, 0x4B, 0x44,
///                           0xB5, 0x12, 0x13, 0x70, 0xF0, 0x2D, 0x74, 0xDE]);
/// frame.extend_from_slice(&[0x00, 0x46, 0x04, 0x0B, 0xC5]);
///
/// let adv = decode_ibeacon(&frame).unwrap();
/// assert_eq!(adv.id.to_string(), "a495bb70-c5b1-4b44-b512-1370f02d74de");
/// assert_eq!(adv.major, 70);
/// assert_eq!(adv.minor, 1035);
/// ```
pub fn decode_ibeacon(data: &[u8]) -> Result<RawAdvertisement, DecodeError> {
    if data.len() < MIN_FRAME_LEN || data[..2] != IBEACON_PREFIX {
        return Err(DecodeError::NotABeaconFrame);
    }

    let mut id = [0u8; 16];
    id.copy_from_slice(&data[2..18]);

    Ok(RawAdvertisement {
        id: BeaconId(id),
        major: u16::from_be_bytes([data[18], data[19]]),
        minor: u16::from_be_bytes([data[20], data[21]]),
    })
}
