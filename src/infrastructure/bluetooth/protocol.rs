//! Heart Rate Service Protocol
//!
//! UUIDs of the standard Bluetooth SIG Heart Rate Service and the decoder for
//! its Heart Rate Measurement characteristic.

use crate::domain::models::{HeartRateSample, SensorContact};
use btleplug::api::bleuuid::uuid_from_u16;
use thiserror::Error;
use uuid::Uuid;

/// Heart Rate Service (`0000180d-0000-1000-8000-00805f9b34fb`)
pub const HEART_RATE_SERVICE_UUID: Uuid = uuid_from_u16(0x180D);

/// Heart Rate Measurement characteristic (`00002a37-0000-1000-8000-00805f9b34fb`)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = uuid_from_u16(0x2A37);

/// Flags bit 0: value is a little-endian u16 instead of a u8.
const FLAG_VALUE_U16: u8 = 0x01;
/// Flags bit 1: skin contact detected (meaningful only with bit 2).
const FLAG_CONTACT_DETECTED: u8 = 0x02;
/// Flags bit 2: sensor contact feature supported.
const FLAG_CONTACT_SUPPORTED: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("heart rate measurement too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

/// Decode a Heart Rate Measurement notification payload.
///
/// # Payload Structure
///
/// ```text
/// [0]     : Flags
///           bit 0: value format (0 = u8, 1 = u16 little-endian)
///           bit 1: sensor contact detected
///           bit 2: sensor contact supported
///           bit 3: energy expended present
///           bit 4: RR intervals present
/// [1]     : Heart rate (u8 format)
/// [1-2]   : Heart rate (u16 format)
/// [..]    : Energy expended / RR intervals (ignored)
/// ```
pub fn decode(bytes: &[u8]) -> Result<HeartRateSample, DecodeError> {
    let Some(&flags) = bytes.first() else {
        return Err(DecodeError::TooShort {
            expected: 2,
            actual: 0,
        });
    };

    let value = if flags & FLAG_VALUE_U16 != 0 {
        match bytes {
            [_, lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            _ => {
                return Err(DecodeError::TooShort {
                    expected: 3,
                    actual: bytes.len(),
                })
            }
        }
    } else {
        match bytes {
            [_, value, ..] => u16::from(*value),
            _ => {
                return Err(DecodeError::TooShort {
                    expected: 2,
                    actual: bytes.len(),
                })
            }
        }
    };

    let sensor_contact = if flags & FLAG_CONTACT_SUPPORTED == 0 {
        SensorContact::Unknown
    } else if flags & FLAG_CONTACT_DETECTED != 0 {
        SensorContact::Detected
    } else {
        SensorContact::NotDetected
    };

    Ok(HeartRateSample {
        value,
        sensor_contact,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_strings() {
        assert_eq!(
            HEART_RATE_SERVICE_UUID.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HEART_RATE_MEASUREMENT_UUID.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_u8_value_without_contact_support() {
        let sample = decode(&[0x00, 0x48]).unwrap();
        assert_eq!(
            sample,
            HeartRateSample {
                value: 72,
                sensor_contact: SensorContact::Unknown
            }
        );
    }

    #[test]
    fn test_u16_value_with_contact_detected() {
        let sample = decode(&[0x07, 0x48, 0x00]).unwrap();
        assert_eq!(
            sample,
            HeartRateSample {
                value: 72,
                sensor_contact: SensorContact::Detected
            }
        );
    }

    #[test]
    fn test_u16_value_is_little_endian() {
        assert_eq!(decode(&[0x01, 0x2C, 0x01]).unwrap().value, 300);
        assert_eq!(decode(&[0x01, 0xFF, 0xFF]).unwrap().value, u16::MAX);
    }

    #[test]
    fn test_u8_value_passes_through_every_byte() {
        for value in 0..=u8::MAX {
            assert_eq!(decode(&[0x00, value]).unwrap().value, u16::from(value));
        }
    }

    #[test]
    fn test_contact_bit_ignored_when_unsupported() {
        assert_eq!(
            decode(&[0x02, 60]).unwrap().sensor_contact,
            SensorContact::Unknown
        );
        assert_eq!(
            decode(&[0x03, 60, 0]).unwrap().sensor_contact,
            SensorContact::Unknown
        );
    }

    #[test]
    fn test_contact_supported_but_not_detected() {
        assert_eq!(
            decode(&[0x04, 60]).unwrap().sensor_contact,
            SensorContact::NotDetected
        );
        assert_eq!(
            decode(&[0x06, 60]).unwrap().sensor_contact,
            SensorContact::Detected
        );
    }

    #[test]
    fn test_trailing_fields_are_ignored() {
        // Energy expended + one RR interval after the u8 value.
        let sample = decode(&[0x18, 80, 0x10, 0x00, 0x00, 0x04]).unwrap();
        assert_eq!(sample.value, 80);
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            decode(&[]),
            Err(DecodeError::TooShort {
                expected: 2,
                actual: 0
            })
        );
        assert_eq!(
            decode(&[0x00]),
            Err(DecodeError::TooShort {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            decode(&[0x01, 0x48]),
            Err(DecodeError::TooShort {
                expected: 3,
                actual: 2
            })
        );
    }
}
