use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rebuli_core::{DOMAIN, EntityKey, MANUFACTURER, MODEL, SensorValue};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{BusEvent, EntityHandle, EntityPlatform, EntitySpec};
use crate::config::MqttPlatformConfig;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum MqttPlatformError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Presents entities through MQTT discovery.
///
/// Each entity gets a retained discovery document under
/// `{discovery_prefix}/{component}/rebuli_rf_bridge/{key}/config` and its
/// state is published to `{state_prefix}/{key}/state`.
pub struct MqttPlatform {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    discovery_prefix: String,
    state_prefix: String,
}

impl MqttPlatform {
    /// Create the client and spawn its event loop. The platform reports ready
    /// once the broker has acknowledged the connection.
    pub fn connect(config: &MqttPlatformConfig, cancel: CancellationToken) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        let (client, event_loop) = AsyncClient::new(options, 32);
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(drive_event_loop(event_loop, Arc::clone(&connected), cancel));

        Self {
            client,
            connected,
            discovery_prefix: config.discovery_prefix.clone(),
            state_prefix: config.state_prefix.clone(),
        }
    }

    fn discovery_topic(&self, spec: &EntitySpec) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.discovery_prefix,
            spec.component(),
            DOMAIN,
            spec.key
        )
    }

    fn state_topic(&self, key: &EntityKey) -> String {
        format!("{}/{}/state", self.state_prefix, key)
    }
}

#[instrument(name = "mqtt_platform", skip_all)]
async fn drive_event_loop(
    mut event_loop: EventLoop,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("MQTT platform shutting down");
                break;
            }
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    connected.store(true, Ordering::Release);
                    info!("Entity platform connected to MQTT broker");
                }
                Ok(_) => {}
                Err(e) => {
                    if connected.swap(false, Ordering::AcqRel) {
                        warn!(error = %e, "Entity platform lost MQTT connection");
                    } else {
                        debug!(error = %e, "Entity platform MQTT connection failed");
                    }
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

#[async_trait]
impl EntityPlatform for MqttPlatform {
    type Handle = MqttEntityHandle;
    type Error = MqttPlatformError;

    async fn is_ready(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn create_entity(&self, spec: &EntitySpec) -> Result<Self::Handle, Self::Error> {
        let state_topic = self.state_topic(&spec.key);
        let discovery = DiscoveryConfig::new(spec, &state_topic);
        let payload = serde_json::to_vec(&discovery)?;

        self.client
            .publish(self.discovery_topic(spec), QoS::AtLeastOnce, true, payload)
            .await?;

        let handle = MqttEntityHandle {
            client: self.client.clone(),
            state_topic,
        };
        handle.set_value(spec.initial_value).await?;

        Ok(handle)
    }

    async fn fire_event(&self, event: BusEvent) -> Result<(), Self::Error> {
        let topic = format!("{}/events/{}", self.state_prefix, event.event_type());
        let payload = serde_json::to_vec(&event)?;

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;

        Ok(())
    }
}

pub struct MqttEntityHandle {
    client: AsyncClient,
    state_topic: String,
}

#[async_trait]
impl EntityHandle for MqttEntityHandle {
    type Error = MqttPlatformError;

    async fn set_value(&self, value: SensorValue) -> Result<(), Self::Error> {
        self.client
            .publish(
                self.state_topic.as_str(),
                QoS::AtLeastOnce,
                true,
                state_payload(value),
            )
            .await?;

        Ok(())
    }
}

fn state_payload(value: SensorValue) -> String {
    match value {
        SensorValue::Bool(true) => "ON".to_string(),
        SensorValue::Bool(false) => "OFF".to_string(),
        SensorValue::Number(number) => number.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct DiscoveryConfig<'a> {
    name: String,
    unique_id: &'a str,
    state_topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_on: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_off: Option<&'static str>,
    device: DiscoveryDevice,
}

#[derive(Debug, Serialize)]
struct DiscoveryDevice {
    identifiers: [String; 1],
    name: String,
    manufacturer: &'static str,
    model: &'static str,
}

impl<'a> DiscoveryConfig<'a> {
    fn new(spec: &'a EntitySpec, state_topic: &'a str) -> Self {
        let binary = spec.kind.is_binary();

        Self {
            name: spec.name(),
            unique_id: spec.unique_id(),
            state_topic,
            device_class: spec.kind.device_class(),
            unit_of_measurement: spec.unit(),
            payload_on: binary.then_some("ON"),
            payload_off: binary.then_some("OFF"),
            device: DiscoveryDevice {
                identifiers: [spec.device_identifier()],
                name: spec.device_name(),
                manufacturer: MANUFACTURER,
                model: MODEL,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use ordered_float::NotNan;
    use rebuli_core::{DeviceId, SensorKind};
    use serde_json::json;

    use super::*;

    fn spec(kind: SensorKind, device_id: u16, initial_value: SensorValue) -> EntitySpec {
        EntitySpec {
            key: EntityKey::new(kind, DeviceId(device_id)),
            kind,
            device_id: DeviceId(device_id),
            initial_value,
            auto_off: false,
        }
    }

    #[test]
    fn sensor_discovery_document() {
        let spec = spec(
            SensorKind::Temperature,
            0x0A1B,
            SensorValue::Number(NotNan::new(21.5).unwrap()),
        );
        let discovery = DiscoveryConfig::new(&spec, "rebuli_rf_bridge/temperature_0A1B/state");

        assert_eq!(
            serde_json::to_value(&discovery).unwrap(),
            json!({
                "name": "Temperature 0A1B",
                "unique_id": "temperature_0A1B",
                "state_topic": "rebuli_rf_bridge/temperature_0A1B/state",
                "device_class": "temperature",
                "unit_of_measurement": "°C",
                "device": {
                    "identifiers": ["device_0A1B"],
                    "name": "Rebuli RF Device 0A1B",
                    "manufacturer": "Rebuli",
                    "model": "RF Bridge",
                },
            })
        );
    }

    #[test]
    fn binary_discovery_document() {
        let spec = spec(SensorKind::Binary, 0x1234, SensorValue::Bool(true));
        let discovery = DiscoveryConfig::new(&spec, "state");
        let value = serde_json::to_value(&discovery).unwrap();

        assert_eq!(value["payload_on"], "ON");
        assert_eq!(value["payload_off"], "OFF");
        assert!(value.get("device_class").is_none());
        assert!(value.get("unit_of_measurement").is_none());
    }

    #[test]
    fn state_payloads() {
        assert_eq!(state_payload(SensorValue::Bool(true)), "ON");
        assert_eq!(state_payload(SensorValue::Bool(false)), "OFF");
        assert_eq!(
            state_payload(SensorValue::Number(NotNan::new(-0.01).unwrap())),
            "-0.01"
        );
        assert_eq!(
            state_payload(SensorValue::Number(NotNan::new(350.0).unwrap())),
            "350"
        );
    }
}
