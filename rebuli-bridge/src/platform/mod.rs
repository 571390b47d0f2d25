pub mod log;
pub mod memory;
pub mod mqtt;

use async_trait::async_trait;
use rebuli_core::{DOMAIN, DeviceId, EntityKey, SensorKind, SensorValue};
use serde::Serialize;
use tracing::debug;

use crate::settings::RetryPolicy;

/// Everything a platform needs to present a newly seen device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySpec {
    pub key: EntityKey,
    pub kind: SensorKind,
    pub device_id: DeviceId,
    pub initial_value: SensorValue,
    pub auto_off: bool,
}

impl EntitySpec {
    /// Display name, e.g. `Temperature 0A1B`.
    pub fn name(&self) -> String {
        format!("{} {}", self.kind.label(), self.device_id)
    }

    pub fn unique_id(&self) -> &str {
        self.key.as_str()
    }

    pub fn unit(&self) -> Option<&'static str> {
        self.kind.unit()
    }

    /// Identifier of the physical transmitter; shared by all its entities.
    pub fn device_identifier(&self) -> String {
        format!("device_{}", self.device_id)
    }

    pub fn device_name(&self) -> String {
        format!("Rebuli RF Device {}", self.device_id)
    }

    /// Entity component: `binary_sensor` for binary devices, `sensor` otherwise.
    pub fn component(&self) -> &'static str {
        if self.kind.is_binary() {
            "binary_sensor"
        } else {
            "sensor"
        }
    }
}

/// Notifications published on the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BusEvent {
    /// A code that could not be decoded.
    UnknownCode { code: i128 },
}

impl BusEvent {
    /// Event type, e.g. `rebuli_rf_bridge.unknown_code`.
    pub fn event_type(&self) -> String {
        let name = match self {
            BusEvent::UnknownCode { .. } => "unknown_code",
        };
        format!("{DOMAIN}.{name}")
    }
}

/// The host system that presents entities and receives bus events.
#[async_trait]
pub trait EntityPlatform: Send + Sync + 'static {
    type Handle: EntityHandle;
    /// Error type for this platform implementation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether entities can be created right now.
    async fn is_ready(&self) -> bool;

    /// Register a new entity, presenting `spec.initial_value` as its state.
    async fn create_entity(&self, spec: &EntitySpec) -> Result<Self::Handle, Self::Error>;

    async fn fire_event(&self, event: BusEvent) -> Result<(), Self::Error>;
}

/// A live entity previously created on an [`EntityPlatform`].
#[async_trait]
pub trait EntityHandle: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn set_value(&self, value: SensorValue) -> Result<(), Self::Error>;
}

/// Probe the platform until it is ready, sleeping `policy.delay` after
/// every failed probe. Returns `false` once `policy.attempts` probes failed.
pub async fn wait_for_platform<P>(platform: &P, policy: RetryPolicy) -> bool
where
    P: EntityPlatform + ?Sized,
{
    for attempt in 1..=policy.attempts {
        if platform.is_ready().await {
            return true;
        }

        debug!(attempt, attempts = policy.attempts, "Entity platform not ready");
        tokio::time::sleep(policy.delay).await;
    }

    false
}
