use std::fmt;

use ordered_float::NotNan;
use serde::{Deserialize, Serialize};

pub mod codec;

pub use codec::{DecodeError, decode, decode_u32, encode};

/// Namespace used for entity unique ids and bus event names.
pub const DOMAIN: &str = "rebuli_rf_bridge";
/// Manufacturer reported for every bridged device.
pub const MANUFACTURER: &str = "Rebuli";
/// Model reported for every bridged device.
pub const MODEL: &str = "RF Bridge";

/// 16-bit identifier of an RF transmitter, carried in bits 28..13 of a code.
///
/// Always rendered as four uppercase, zero-padded hex digits (`0A1B`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u16);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// Kind of sensor a code was produced by.
///
/// Selector values 0..=7 map onto the first eight variants in declaration
/// order. `Unknown` only exists so that a selector outside the table has
/// somewhere to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Binary,
    Distance,
    Power,
    Voltage,
    Current,
    Battery,
    Unknown,
}

impl SensorKind {
    pub fn from_selector(selector: u8) -> Self {
        match selector {
            0 => SensorKind::Temperature,
            1 => SensorKind::Humidity,
            2 => SensorKind::Binary,
            3 => SensorKind::Distance,
            4 => SensorKind::Power,
            5 => SensorKind::Voltage,
            6 => SensorKind::Current,
            7 => SensorKind::Battery,
            _ => SensorKind::Unknown,
        }
    }

    /// Inverse of [`SensorKind::from_selector`]; `None` for `Unknown`.
    pub fn selector(self) -> Option<u8> {
        match self {
            SensorKind::Temperature => Some(0),
            SensorKind::Humidity => Some(1),
            SensorKind::Binary => Some(2),
            SensorKind::Distance => Some(3),
            SensorKind::Power => Some(4),
            SensorKind::Voltage => Some(5),
            SensorKind::Current => Some(6),
            SensorKind::Battery => Some(7),
            SensorKind::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Binary => "binary",
            SensorKind::Distance => "distance",
            SensorKind::Power => "power",
            SensorKind::Voltage => "voltage",
            SensorKind::Current => "current",
            SensorKind::Battery => "battery",
            SensorKind::Unknown => "unknown",
        }
    }

    /// Capitalised form used in entity display names.
    pub fn label(self) -> &'static str {
        match self {
            SensorKind::Temperature => "Temperature",
            SensorKind::Humidity => "Humidity",
            SensorKind::Binary => "Binary",
            SensorKind::Distance => "Distance",
            SensorKind::Power => "Power",
            SensorKind::Voltage => "Voltage",
            SensorKind::Current => "Current",
            SensorKind::Battery => "Battery",
            SensorKind::Unknown => "Unknown",
        }
    }

    /// Unit of measurement attached for presentation only.
    pub fn unit(self) -> Option<&'static str> {
        match self {
            SensorKind::Temperature => Some("°C"),
            SensorKind::Humidity | SensorKind::Battery => Some("%"),
            SensorKind::Distance => Some("cm"),
            SensorKind::Power => Some("W"),
            SensorKind::Voltage => Some("V"),
            SensorKind::Current => Some("A"),
            SensorKind::Binary | SensorKind::Unknown => None,
        }
    }

    /// Device class understood by home-automation front ends.
    pub fn device_class(self) -> Option<&'static str> {
        match self {
            SensorKind::Binary | SensorKind::Unknown => None,
            other => Some(other.as_str()),
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, SensorKind::Binary)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known state of a sensor: on/off for binary devices, a finite number
/// for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Bool(bool),
    Number(NotNan<f64>),
}

impl SensorValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SensorValue::Bool(on) => Some(*on),
            SensorValue::Number(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Bool(_) => None,
            SensorValue::Number(value) => Some(value.into_inner()),
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Bool(true) => f.write_str("on"),
            SensorValue::Bool(false) => f.write_str("off"),
            SensorValue::Number(value) => write!(f, "{value}"),
        }
    }
}

/// Identity of a bridged entity: `"{kind}_{device_id:04X}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(kind: SensorKind, device_id: DeviceId) -> Self {
        Self(format!("{kind}_{device_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed reading decoded from a single 32-bit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub kind: SensorKind,
    pub device_id: DeviceId,
    pub value: SensorValue,
    /// Whether a binary device resets itself; `None` for every other kind.
    pub auto_off: Option<bool>,
}

impl Reading {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_key_is_kind_and_padded_upper_hex() {
        assert_eq!(
            EntityKey::new(SensorKind::Binary, DeviceId(0x1234)).as_str(),
            "binary_1234"
        );
        assert_eq!(
            EntityKey::new(SensorKind::Temperature, DeviceId(0x0a1b)).as_str(),
            "temperature_0A1B"
        );
        assert_eq!(
            EntityKey::new(SensorKind::Power, DeviceId(1)).as_str(),
            "power_0001"
        );
    }

    #[test]
    fn selector_table_is_fixed() {
        let table = [
            SensorKind::Temperature,
            SensorKind::Humidity,
            SensorKind::Binary,
            SensorKind::Distance,
            SensorKind::Power,
            SensorKind::Voltage,
            SensorKind::Current,
            SensorKind::Battery,
        ];
        for (selector, kind) in (0u8..).zip(table) {
            assert_eq!(SensorKind::from_selector(selector), kind, "selector {selector}");
        }
    }

    #[test]
    fn selector_table_round_trips() {
        for selector in 0..8u8 {
            let kind = SensorKind::from_selector(selector);
            assert_ne!(kind, SensorKind::Unknown);
            assert_eq!(kind.selector(), Some(selector));
        }
        assert_eq!(SensorKind::from_selector(8), SensorKind::Unknown);
        assert_eq!(SensorKind::from_selector(u8::MAX), SensorKind::Unknown);
        assert_eq!(SensorKind::Unknown.selector(), None);
    }

    #[test]
    fn units_follow_kind() {
        assert_eq!(SensorKind::Temperature.unit(), Some("°C"));
        assert_eq!(SensorKind::Humidity.unit(), Some("%"));
        assert_eq!(SensorKind::Battery.unit(), Some("%"));
        assert_eq!(SensorKind::Distance.unit(), Some("cm"));
        assert_eq!(SensorKind::Power.unit(), Some("W"));
        assert_eq!(SensorKind::Voltage.unit(), Some("V"));
        assert_eq!(SensorKind::Current.unit(), Some("A"));
        assert_eq!(SensorKind::Binary.unit(), None);
        assert_eq!(SensorKind::Unknown.unit(), None);
    }

    #[test]
    fn sensor_value_accessors() {
        assert_eq!(SensorValue::Bool(true).to_string(), "on");
        assert_eq!(SensorValue::Bool(false).as_bool(), Some(false));

        let number = SensorValue::Number(NotNan::new(21.5).unwrap());
        assert_eq!(number.to_string(), "21.5");
        assert_eq!(number.as_f64(), Some(21.5));
        assert_eq!(number.as_bool(), None);
    }
}
