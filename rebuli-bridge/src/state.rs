use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::pipeline::{IngestOutcome, RejectReason};
use crate::registry::DeviceSnapshot;

/// Counters exposed over HTTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub received: u64,
    pub created: u64,
    pub updated: u64,
    pub filtered: u64,
    pub malformed: u64,
    pub unknown_codes: u64,
    pub platform_failures: u64,
    pub auto_off_resets: u64,
    pub entities: usize,
    pub uptime_seconds: u64,
}

/// Shared state for tracking what the pipeline has done.
pub struct BridgeState {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    stats: BridgeStats,
    devices: Vec<DeviceSnapshot>,
    startup_time: Instant,
}

impl BridgeState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                stats: BridgeStats::default(),
                devices: Vec::new(),
                startup_time: Instant::now(),
            })),
        }
    }

    /// Count one inbound message and how it ended.
    pub async fn record_outcome(&self, outcome: &IngestOutcome) {
        let mut inner = self.inner.lock().await;
        let stats = &mut inner.stats;
        stats.received += 1;

        match outcome {
            IngestOutcome::Accepted { created: true, .. } => stats.created += 1,
            IngestOutcome::Accepted { created: false, .. } => stats.updated += 1,
            IngestOutcome::Filtered { .. } => stats.filtered += 1,
            IngestOutcome::Rejected(RejectReason::MalformedMessage(_)) => stats.malformed += 1,
            IngestOutcome::Rejected(RejectReason::UnknownCode { .. }) => stats.unknown_codes += 1,
            IngestOutcome::Deferred { .. } => stats.platform_failures += 1,
        }
    }

    pub async fn record_auto_off(&self) {
        let mut inner = self.inner.lock().await;
        inner.stats.auto_off_resets += 1;
    }

    /// Count a failure to present an auto-off reset.
    pub async fn record_platform_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.stats.platform_failures += 1;
    }

    /// Replace the published device list.
    pub async fn set_devices(&self, devices: Vec<DeviceSnapshot>) {
        let mut inner = self.inner.lock().await;
        inner.stats.entities = devices.len();
        inner.devices = devices;
    }

    pub async fn devices(&self) -> Vec<DeviceSnapshot> {
        self.inner.lock().await.devices.clone()
    }

    pub async fn stats(&self) -> BridgeStats {
        let inner = self.inner.lock().await;
        BridgeStats {
            uptime_seconds: inner.startup_time.elapsed().as_secs(),
            ..inner.stats
        }
    }
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for BridgeState {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use rebuli_core::{DecodeError, DeviceId, EntityKey, SensorKind};

    use super::*;
    use crate::envelope::EnvelopeError;
    use crate::pipeline::IngestError;

    #[tokio::test]
    async fn outcomes_are_counted() {
        let state = BridgeState::new();
        let key = EntityKey::new(SensorKind::Temperature, DeviceId(1));

        let outcomes = [
            IngestOutcome::Accepted {
                key: key.clone(),
                created: true,
            },
            IngestOutcome::Accepted {
                key: key.clone(),
                created: false,
            },
            IngestOutcome::Accepted {
                key: key.clone(),
                created: false,
            },
            IngestOutcome::Filtered {
                device_id: DeviceId(2),
            },
            IngestOutcome::Rejected(RejectReason::MalformedMessage(EnvelopeError::MissingCode)),
            IngestOutcome::Rejected(RejectReason::UnknownCode {
                code: -1,
                error: DecodeError::OutOfRange(-1),
            }),
            IngestOutcome::Deferred {
                key,
                error: IngestError::PlatformUnavailable { attempts: 5 },
            },
        ];
        for outcome in &outcomes {
            state.record_outcome(outcome).await;
        }
        state.record_auto_off().await;
        state.record_platform_failure().await;

        let stats = state.stats().await;
        assert_eq!(stats.received, 7);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.updated, 2);
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.unknown_codes, 1);
        assert_eq!(stats.platform_failures, 2);
        assert_eq!(stats.auto_off_resets, 1);
    }

    #[tokio::test]
    async fn clones_share_counters() {
        let state = BridgeState::default();
        let clone = state.clone();

        clone.record_auto_off().await;
        assert_eq!(state.stats().await.auto_off_resets, 1);
        assert!(state.devices().await.is_empty());
    }
}
