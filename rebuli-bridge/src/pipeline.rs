use std::collections::HashMap;

use rebuli_core::{DecodeError, DeviceId, EntityKey, SensorValue};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::envelope::{EnvelopeError, parse_envelope};
use crate::platform::{BusEvent, EntityHandle, EntityPlatform, EntitySpec, wait_for_platform};
use crate::registry::{AcceptOutcome, DeviceRecord, DeviceRegistry};
use crate::scheduler::{AutoOffExpired, AutoOffScheduler};
use crate::settings::{RetryPolicy, Settings};
use crate::state::BridgeState;

/// Everything the pipeline task consumes, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineInput {
    /// A raw message from a code source.
    Payload(Vec<u8>),
    /// An auto-off timer ran out.
    AutoOff(AutoOffExpired),
}

/// Why a message was dropped before reaching the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] EnvelopeError),

    #[error("unknown or unrecognized code {code}: {error}")]
    UnknownCode { code: i128, error: DecodeError },
}

/// Failures presenting an accepted reading on the entity platform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("entity platform not ready after {attempts} attempts")]
    PlatformUnavailable { attempts: u32 },

    #[error("entity platform error: {0}")]
    Platform(String),
}

/// How one inbound message ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The registry holds the reading and the entity shows it.
    Accepted { key: EntityKey, created: bool },
    /// The device is not on the allow list.
    Filtered { device_id: DeviceId },
    Rejected(RejectReason),
    /// The registry holds the reading but the entity could not be updated.
    Deferred { key: EntityKey, error: IngestError },
}

/// Single-writer ingest loop: decodes codes, keeps the registry, drives the
/// entity platform and owns the auto-off timers.
pub struct Pipeline<P: EntityPlatform> {
    platform: P,
    registry: DeviceRegistry,
    scheduler: AutoOffScheduler,
    entities: HashMap<EntityKey, P::Handle>,
    settings: watch::Receiver<Settings>,
    state: BridgeState,
}

impl<P: EntityPlatform> Pipeline<P> {
    /// `tx` must feed the receiver later passed to [`Pipeline::run`]; timer
    /// expiries come back through it.
    pub fn new(
        platform: P,
        settings: watch::Receiver<Settings>,
        tx: mpsc::Sender<PipelineInput>,
        state: BridgeState,
    ) -> Self {
        Self {
            platform,
            registry: DeviceRegistry::new(),
            scheduler: AutoOffScheduler::new(tx),
            entities: HashMap::new(),
            settings,
            state,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Whether an entity has been registered on the platform for `key`.
    pub fn has_entity(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    #[instrument(name = "pipeline", skip_all)]
    pub async fn run(&mut self, mut rx: mpsc::Receiver<PipelineInput>, cancel: CancellationToken) {
        info!("Ingest pipeline started");

        loop {
            let input = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Ingest pipeline shutting down");
                    break;
                }
                input = rx.recv() => match input {
                    Some(input) => input,
                    None => {
                        info!("Ingest pipeline input closed");
                        break;
                    }
                }
            };

            // a message may be parked in wait_for_platform
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Ingest pipeline shutting down, dropping the message in flight");
                    break;
                }
                _ = self.handle(input) => {}
            }
        }

        let cancelled = AutoOffScheduler::cancel_all(self.registry.records_mut());
        info!(cancelled, "Cancelled pending auto-off timers");
    }

    /// Process one input and update the shared stats.
    pub async fn handle(&mut self, input: PipelineInput) {
        match input {
            PipelineInput::Payload(payload) => {
                let outcome = self.handle_payload(&payload).await;
                self.state.record_outcome(&outcome).await;
            }
            PipelineInput::AutoOff(expired) => {
                if let Some(presented) = self.handle_auto_off(expired).await {
                    self.state.record_auto_off().await;
                    if presented.is_err() {
                        self.state.record_platform_failure().await;
                    }
                }
            }
        }

        self.state.set_devices(self.registry.snapshot()).await;
    }

    pub async fn handle_payload(&mut self, payload: &[u8]) -> IngestOutcome {
        match parse_envelope(payload) {
            Ok(code) => self.handle_code(code).await,
            Err(e) => {
                warn!(
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "Invalid RF message format"
                );
                IngestOutcome::Rejected(e.into())
            }
        }
    }

    pub async fn handle_code(&mut self, code: i128) -> IngestOutcome {
        let reading = match rebuli_core::decode(code) {
            Ok(reading) => reading,
            Err(error) => {
                warn!(%code, %error, "Unknown or unrecognized RF code");
                if let Err(e) = self.platform.fire_event(BusEvent::UnknownCode { code }).await {
                    error!(error = %e, %code, "Failed to fire unknown code event");
                }
                return IngestOutcome::Rejected(RejectReason::UnknownCode { code, error });
            }
        };

        // one consistent view of the settings for the whole message
        let settings = self.settings.borrow().clone();

        let (spec, created) = match self.registry.accept(&reading, &settings.allowed_ids) {
            AcceptOutcome::Filtered => {
                warn!(
                    device_id = %reading.device_id,
                    kind = %reading.kind,
                    "Ignoring RF device not in allowed list"
                );
                return IngestOutcome::Filtered {
                    device_id: reading.device_id,
                };
            }
            AcceptOutcome::Created(record) => {
                info!(
                    entity = %record.key(),
                    value = %record.value(),
                    "New RF device discovered"
                );
                (entity_spec(record), true)
            }
            AcceptOutcome::Updated { record, old_value } => {
                debug!(
                    entity = %record.key(),
                    old = %old_value,
                    new = %record.value(),
                    "RF device updated"
                );
                (entity_spec(record), false)
            }
        };

        // the timeout runs from the message, not from when the platform answers
        if let SensorValue::Bool(on) = spec.initial_value
            && let Some(record) = self.registry.get_mut(&spec.key)
        {
            self.scheduler
                .on_state_change(record, on, settings.auto_off_timeout);
        }

        let presented = self.present(&spec, settings.platform_retry).await;

        match presented {
            Ok(()) => IngestOutcome::Accepted {
                key: spec.key,
                created,
            },
            Err(error) => IngestOutcome::Deferred {
                key: spec.key,
                error,
            },
        }
    }

    /// Apply a timer expiry.
    ///
    /// Returns `None` for stale or unknown expiries. Otherwise the device was
    /// reset and the result tells whether the entity shows it.
    pub async fn handle_auto_off(
        &mut self,
        expired: AutoOffExpired,
    ) -> Option<Result<(), IngestError>> {
        let Some(record) = self.registry.get_mut(&expired.key) else {
            return None;
        };

        if !AutoOffScheduler::take_expired(record, expired.generation) {
            debug!(
                entity = %expired.key,
                generation = expired.generation,
                "Ignoring stale auto-off expiry"
            );
            return None;
        }

        self.registry.update(&expired.key, SensorValue::Bool(false));
        info!(entity = %expired.key, "Auto-off: resetting binary sensor");

        let spec = entity_spec(self.registry.get(&expired.key)?);
        let retry = self.settings.borrow().platform_retry;

        Some(self.present(&spec, retry).await)
    }

    /// Push the current value to the entity, creating it on first use.
    async fn present(&mut self, spec: &EntitySpec, retry: RetryPolicy) -> Result<(), IngestError> {
        if let Some(handle) = self.entities.get(&spec.key) {
            return handle.set_value(spec.initial_value).await.map_err(|e| {
                error!(entity = %spec.key, error = %e, "Failed to update entity");
                IngestError::Platform(e.to_string())
            });
        }

        if !wait_for_platform(&self.platform, retry).await {
            error!(
                entity = %spec.key,
                attempts = retry.attempts,
                "Failed to get entity platform after retries"
            );
            return Err(IngestError::PlatformUnavailable {
                attempts: retry.attempts,
            });
        }

        match self.platform.create_entity(spec).await {
            Ok(handle) => {
                info!(entity = %spec.key, name = %spec.name(), "Entity registered");
                self.entities.insert(spec.key.clone(), handle);
                Ok(())
            }
            Err(e) => {
                error!(entity = %spec.key, error = %e, "Failed to create entity");
                Err(IngestError::Platform(e.to_string()))
            }
        }
    }
}

/// Presentation of a record as it stands now.
fn entity_spec(record: &DeviceRecord) -> EntitySpec {
    EntitySpec {
        key: record.key().clone(),
        kind: record.kind(),
        device_id: record.device_id(),
        initial_value: record.value(),
        auto_off: record.auto_off(),
    }
}

#[cfg(test)]
mod tests {
    use rebuli_core::encode;

    use super::*;
    use crate::platform::memory::MemoryPlatform;

    fn pipeline(platform: MemoryPlatform) -> Pipeline<MemoryPlatform> {
        let (tx, _rx) = mpsc::channel(8);
        let (_settings_tx, settings_rx) = watch::channel(Settings::default());
        Pipeline::new(platform, settings_rx, tx, BridgeState::new())
    }

    #[tokio::test]
    async fn entity_spec_tracks_record() {
        let mut pipeline = pipeline(MemoryPlatform::default());
        let outcome = pipeline.handle_code(encode(3, 0x00FF, 150).into()).await;

        let (key, created) = match outcome {
            IngestOutcome::Accepted { key, created } => (key, created),
            other => panic!("expected Accepted, got {other:?}"),
        };
        assert!(created);

        let record = pipeline.registry().get(&key).unwrap();
        let spec = entity_spec(record);
        assert_eq!(spec.key.as_str(), "distance_00FF");
        assert_eq!(spec.initial_value.as_f64(), Some(150.0));
        assert!(!spec.auto_off);
        assert!(pipeline.has_entity(&key));
    }

    #[tokio::test]
    async fn unknown_code_does_not_touch_registry() {
        let platform = MemoryPlatform::default();
        let mut pipeline = pipeline(platform.clone());

        let code = 1_i128 << 32;
        assert_eq!(
            pipeline.handle_code(code).await,
            IngestOutcome::Rejected(RejectReason::UnknownCode {
                code,
                error: DecodeError::OutOfRange(code),
            })
        );
        assert!(pipeline.registry().is_empty());
        assert_eq!(platform.events(), vec![BusEvent::UnknownCode { code }]);
    }
}
