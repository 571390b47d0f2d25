use std::collections::HashMap;
use std::collections::hash_map::Entry;

use jiff::Timestamp;
use rebuli_core::{DeviceId, EntityKey, Reading, SensorKind, SensorValue};
use serde::Serialize;

use crate::scheduler::AutoOffTimer;
use crate::settings::AllowList;

/// State of one bridged device.
///
/// The key, kind and device id are fixed at creation; only the value (and
/// the auto-off timer of binary devices) changes afterwards.
#[derive(Debug)]
pub struct DeviceRecord {
    key: EntityKey,
    kind: SensorKind,
    device_id: DeviceId,
    value: SensorValue,
    auto_off: bool,
    last_updated: Timestamp,
    pub(crate) timer: Option<AutoOffTimer>,
}

impl DeviceRecord {
    fn new(key: EntityKey, reading: &Reading) -> Self {
        Self {
            key,
            kind: reading.kind,
            device_id: reading.device_id,
            value: reading.value,
            auto_off: reading.auto_off.unwrap_or(false),
            last_updated: Timestamp::now(),
            timer: None,
        }
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn value(&self) -> SensorValue {
        self.value
    }

    /// Whether this is a binary device that resets itself.
    pub fn auto_off(&self) -> bool {
        self.auto_off
    }

    pub fn last_updated(&self) -> Timestamp {
        self.last_updated
    }

    pub fn has_active_timer(&self) -> bool {
        self.timer.is_some()
    }

    fn replace_value(&mut self, value: SensorValue) -> SensorValue {
        self.last_updated = Timestamp::now();
        std::mem::replace(&mut self.value, value)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            key: self.key.clone(),
            kind: self.kind,
            device_id: self.device_id,
            value: self.value,
            auto_off: self.auto_off,
            timer_active: self.timer.is_some(),
            last_updated: self.last_updated,
        }
    }
}

/// Serializable copy of a [`DeviceRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub key: EntityKey,
    pub kind: SensorKind,
    pub device_id: DeviceId,
    pub value: SensorValue,
    pub auto_off: bool,
    pub timer_active: bool,
    pub last_updated: Timestamp,
}

/// Result of offering a reading to the registry.
#[derive(Debug)]
pub enum AcceptOutcome<'a> {
    /// The device is not on the allow list; nothing changed.
    Filtered,
    Created(&'a mut DeviceRecord),
    Updated {
        record: &'a mut DeviceRecord,
        old_value: SensorValue,
    },
}

/// In-memory device state, keyed by entity key.
///
/// Owned by a single pipeline task; it does no locking of its own.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: HashMap<EntityKey, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, reading: &Reading, allowed: &AllowList) -> AcceptOutcome<'_> {
        if !allowed.allows(reading.device_id) {
            return AcceptOutcome::Filtered;
        }

        match self.records.entry(reading.key()) {
            Entry::Occupied(entry) => {
                let record = entry.into_mut();
                let old_value = record.replace_value(reading.value);
                AcceptOutcome::Updated { record, old_value }
            }
            Entry::Vacant(entry) => {
                let record = DeviceRecord::new(entry.key().clone(), reading);
                AcceptOutcome::Created(entry.insert(record))
            }
        }
    }

    /// Set the value of an existing record, returning the previous value.
    pub fn update(&mut self, key: &EntityKey, value: SensorValue) -> Option<SensorValue> {
        self.records
            .get_mut(key)
            .map(|record| record.replace_value(value))
    }

    pub fn get(&self, key: &EntityKey) -> Option<&DeviceRecord> {
        self.records.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &EntityKey) -> Option<&mut DeviceRecord> {
        self.records.get_mut(key)
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut DeviceRecord> {
        self.records.values_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, ordered by key.
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let mut snapshot: Vec<_> = self.records.values().map(DeviceRecord::snapshot).collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use ordered_float::NotNan;
    use rebuli_core::{decode_u32, encode};

    use super::*;

    fn reading(selector: u8, device_id: u16, payload: u16) -> Reading {
        decode_u32(encode(selector, device_id, payload)).unwrap()
    }

    fn temperature(value: f64) -> SensorValue {
        SensorValue::Number(NotNan::new(value).unwrap())
    }

    #[test]
    fn first_reading_creates_record() {
        let mut registry = DeviceRegistry::new();
        let allowed = AllowList::default();

        let record = match registry.accept(&reading(0, 0x0A1B, 2150), &allowed) {
            AcceptOutcome::Created(record) => record,
            other => panic!("expected Created, got {other:?}"),
        };
        assert_eq!(record.key().as_str(), "temperature_0A1B");
        assert_eq!(record.kind(), SensorKind::Temperature);
        assert_eq!(record.device_id(), DeviceId(0x0A1B));
        assert_eq!(record.value(), temperature(21.5));
        assert!(!record.auto_off());
        assert!(!record.has_active_timer());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn later_readings_update_in_place() {
        let mut registry = DeviceRegistry::new();
        let allowed = AllowList::default();

        registry.accept(&reading(0, 0x0A1B, 2150), &allowed);
        let (record, old_value) = match registry.accept(&reading(0, 0x0A1B, 2200), &allowed) {
            AcceptOutcome::Updated { record, old_value } => (record, old_value),
            other => panic!("expected Updated, got {other:?}"),
        };
        assert_eq!(old_value, temperature(21.5));
        assert_eq!(record.value(), temperature(22.0));
        assert_eq!(record.kind(), SensorKind::Temperature);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn identical_readings_are_idempotent() {
        let mut registry = DeviceRegistry::new();
        let allowed = AllowList::default();
        let on = reading(2, 0x1234, 0b11);

        registry.accept(&on, &allowed);
        for _ in 0..2 {
            match registry.accept(&on, &allowed) {
                AcceptOutcome::Updated { record, old_value } => {
                    assert_eq!(old_value, SensorValue::Bool(true));
                    assert_eq!(record.value(), SensorValue::Bool(true));
                    assert!(record.auto_off());
                }
                other => panic!("expected Updated, got {other:?}"),
            }
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn same_device_different_kinds_are_separate_records() {
        let mut registry = DeviceRegistry::new();
        let allowed = AllowList::default();

        registry.accept(&reading(0, 0x0001, 100), &allowed);
        registry.accept(&reading(1, 0x0001, 455), &allowed);
        registry.accept(&reading(0, 0x0002, 100), &allowed);

        let keys: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|s| s.key.to_string())
            .collect();
        assert_eq!(
            keys,
            vec!["humidity_0001", "temperature_0001", "temperature_0002"]
        );
    }

    #[test]
    fn allow_list_filters_regardless_of_kind() {
        let mut registry = DeviceRegistry::new();
        let allowed: AllowList = ["0A1B"].into_iter().collect();

        for selector in 0..8 {
            assert!(!matches!(
                registry.accept(&reading(selector, 0x0A1B, 1), &allowed),
                AcceptOutcome::Filtered
            ));
            assert!(matches!(
                registry.accept(&reading(selector, 0x0A1C, 1), &allowed),
                AcceptOutcome::Filtered
            ));
        }
        assert_eq!(registry.len(), 8);
        assert!(registry.iter().all(|r| r.device_id() == DeviceId(0x0A1B)));
    }

    #[test]
    fn update_by_key() {
        let mut registry = DeviceRegistry::new();
        let on = reading(2, 0x1234, 0b11);
        registry.accept(&on, &AllowList::default());

        let previous = registry.update(&on.key(), SensorValue::Bool(false));
        assert_eq!(previous, Some(SensorValue::Bool(true)));
        assert_eq!(
            registry.get(&on.key()).map(DeviceRecord::value),
            Some(SensorValue::Bool(false))
        );

        let missing = EntityKey::new(SensorKind::Binary, DeviceId(0x4321));
        assert_eq!(registry.update(&missing, SensorValue::Bool(true)), None);
        assert!(registry.get(&missing).is_none());
    }
}
