use std::convert::Infallible;

use async_trait::async_trait;
use rebuli_core::{EntityKey, SensorValue};
use tracing::info;

use super::{BusEvent, EntityHandle, EntityPlatform, EntitySpec};

/// Platform that only reports entity changes through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPlatform;

#[async_trait]
impl EntityPlatform for LogPlatform {
    type Handle = LogEntityHandle;
    type Error = Infallible;

    async fn is_ready(&self) -> bool {
        true
    }

    async fn create_entity(&self, spec: &EntitySpec) -> Result<Self::Handle, Self::Error> {
        info!(
            entity = %spec.key,
            name = %spec.name(),
            device = %spec.device_name(),
            unit = spec.unit().unwrap_or(""),
            value = %spec.initial_value,
            auto_off = spec.auto_off,
            "Entity created"
        );

        Ok(LogEntityHandle {
            key: spec.key.clone(),
        })
    }

    async fn fire_event(&self, event: BusEvent) -> Result<(), Self::Error> {
        info!(event_type = %event.event_type(), data = ?event, "Bus event");
        Ok(())
    }
}

pub struct LogEntityHandle {
    key: EntityKey,
}

#[async_trait]
impl EntityHandle for LogEntityHandle {
    type Error = Infallible;

    async fn set_value(&self, value: SensorValue) -> Result<(), Self::Error> {
        info!(entity = %self.key, %value, "Entity state updated");
        Ok(())
    }
}
