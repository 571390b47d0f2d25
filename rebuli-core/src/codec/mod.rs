mod error;

pub use error::DecodeError;

use ordered_float::NotNan;

use crate::{DeviceId, Reading, SensorKind, SensorValue};

// code layout (msb -> lsb): selector(3) + device id(16) + payload(13)

pub const SELECTOR_SHIFT: u32 = 29;
pub const SELECTOR_MASK: u32 = 0b111;
pub const DEVICE_ID_SHIFT: u32 = 13;
pub const DEVICE_ID_MASK: u32 = 0xFFFF;
pub const PAYLOAD_MASK: u32 = 0x1FFF;
/// Sign bit of the 13-bit temperature payload.
pub const PAYLOAD_SIGN_BIT: u16 = 0x1000;
/// Binary payload: bit 0 is the on/off state.
pub const BINARY_STATE_BIT: u16 = 0b01;
/// Binary payload: bit 1 marks a self-resetting device.
pub const BINARY_AUTO_OFF_BIT: u16 = 0b10;

/// Decode any integer into a reading.
///
/// Anything outside `0..2^32` is rejected with [`DecodeError::OutOfRange`]
/// rather than truncated.
pub fn decode(code: i128) -> Result<Reading, DecodeError> {
    let code = u32::try_from(code).map_err(|_| DecodeError::OutOfRange(code))?;
    decode_u32(code)
}

/// Decode a code that is already known to be 32 bits wide.
pub fn decode_u32(code: u32) -> Result<Reading, DecodeError> {
    let selector = ((code >> SELECTOR_SHIFT) & SELECTOR_MASK) as u8;
    let device_id = ((code >> DEVICE_ID_SHIFT) & DEVICE_ID_MASK) as u16;
    let payload = (code & PAYLOAD_MASK) as u16;

    reading_from_fields(selector, device_id, payload)
}

/// Build a reading from already split fields.
///
/// Unlike [`decode_u32`] the selector is not masked, so values above 7 land
/// on [`SensorKind::Unknown`] and are rejected.
pub fn reading_from_fields(
    selector: u8,
    device_id: u16,
    payload: u16,
) -> Result<Reading, DecodeError> {
    let kind = SensorKind::from_selector(selector);
    let device_id = DeviceId(device_id);
    let payload = payload & PAYLOAD_MASK as u16;

    let value = match kind {
        SensorKind::Temperature => {
            let mut raw = payload as i16;
            if payload & PAYLOAD_SIGN_BIT != 0 {
                raw -= 0x2000;
            }
            NotNan::<f64>::from(raw) / NotNan::<f64>::from(100u8)
        }
        SensorKind::Voltage | SensorKind::Current | SensorKind::Humidity | SensorKind::Battery => {
            NotNan::<f64>::from(payload) / NotNan::<f64>::from(10u8)
        }
        SensorKind::Distance | SensorKind::Power => NotNan::<f64>::from(payload),
        SensorKind::Binary => {
            return Ok(Reading {
                kind,
                device_id,
                value: SensorValue::Bool(payload & BINARY_STATE_BIT != 0),
                auto_off: Some(payload & BINARY_AUTO_OFF_BIT != 0),
            });
        }
        SensorKind::Unknown => return Err(DecodeError::UnrecognizedType { selector }),
    };

    Ok(Reading {
        kind,
        device_id,
        value: SensorValue::Number(value),
        auto_off: None,
    })
}

/// Pack fields into a code. The selector is masked to 3 bits and the payload
/// to 13 bits.
pub fn encode(selector: u8, device_id: u16, payload: u16) -> u32 {
    ((selector as u32 & SELECTOR_MASK) << SELECTOR_SHIFT)
        | ((device_id as u32) << DEVICE_ID_SHIFT)
        | (payload as u32 & PAYLOAD_MASK)
}
