use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rebuli_core::{DeviceId, SensorKind, encode};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::CodeSource;
use crate::pipeline::PipelineInput;

/// A simulated transmitter with a fixed id and sensor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockTransmitter {
    pub device_id: DeviceId,
    pub selector: u8,
    /// Only meaningful for binary transmitters.
    pub auto_off: bool,
}

impl MockTransmitter {
    pub fn kind(&self) -> SensorKind {
        SensorKind::from_selector(self.selector)
    }

    fn random_code<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        let raw: u16 = match self.kind() {
            SensorKind::Temperature => {
                let centi: i16 = rng.random_range(-1500..4000);
                // 13-bit two's complement
                centi as u16 & 0x1FFF
            }
            SensorKind::Humidity | SensorKind::Battery => rng.random_range(0..=1000),
            SensorKind::Binary => rng.random_bool(0.5) as u16 | (self.auto_off as u16) << 1,
            SensorKind::Distance => rng.random_range(0..500),
            SensorKind::Power => rng.random_range(0..3000),
            SensorKind::Voltage => rng.random_range(2100..2500),
            SensorKind::Current => rng.random_range(0..160),
            SensorKind::Unknown => 0,
        };

        encode(self.selector, self.device_id.0, raw)
    }
}

/// Code source that generates random but well-formed codes.
pub struct MockCodeSource {
    interval: Duration,
    noise_ratio: f64,
    transmitters: Arc<Vec<MockTransmitter>>,
}

impl MockCodeSource {
    pub fn new(interval: Duration, device_count: u16, noise_ratio: f64) -> Self {
        let mut rng = rand::rng();
        let mut seen = HashSet::new();
        let mut transmitters = Vec::with_capacity(usize::from(device_count));

        while transmitters.len() < usize::from(device_count) {
            let device_id = DeviceId(rng.random());
            if !seen.insert(device_id) {
                continue;
            }

            transmitters.push(MockTransmitter {
                device_id,
                selector: rng.random_range(0..8),
                auto_off: rng.random_bool(0.5),
            });
        }

        Self {
            interval,
            noise_ratio: if noise_ratio.is_nan() {
                0.0
            } else {
                noise_ratio.clamp(0.0, 1.0)
            },
            transmitters: Arc::new(transmitters),
        }
    }

    pub fn transmitters(&self) -> &[MockTransmitter] {
        &self.transmitters
    }
}

/// One inbound message, occasionally garbage when `noise_ratio` > 0.
fn next_payload(transmitters: &[MockTransmitter], noise_ratio: f64) -> Option<Vec<u8>> {
    let mut rng = rand::rng();

    if rng.random_bool(noise_ratio) {
        let noise = match rng.random_range(0..3) {
            0 => json!({ "code": "static" }),
            1 => json!({ "code": u64::from(u32::MAX) + 1 }),
            _ => json!({ "signal": rng.random::<u32>() }),
        };
        return Some(noise.to_string().into_bytes());
    }

    let index = rng.random_range(0..transmitters.len().max(1));
    let code = transmitters.get(index)?.random_code(&mut rng);
    Some(json!({ "code": code }).to_string().into_bytes())
}

#[async_trait]
impl CodeSource for MockCodeSource {
    type Error = std::convert::Infallible;

    async fn start(
        &self,
        tx: mpsc::Sender<PipelineInput>,
        cancel: CancellationToken,
    ) -> Result<(), Self::Error> {
        let transmitters = Arc::clone(&self.transmitters);
        let interval = self.interval;
        let noise_ratio = self.noise_ratio;

        info!(
            device_count = transmitters.len(),
            interval_ms = interval.as_millis() as u64,
            noise_ratio,
            "Starting mock code source"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Mock code source shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let Some(payload) = next_payload(&transmitters, noise_ratio) else {
                            continue;
                        };
                        if tx.send(PipelineInput::Payload(payload)).await.is_err() {
                            info!("Channel closed, mock code source shutting down");
                            return;
                        }
                    }
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rebuli_core::decode_u32;

    use super::*;
    use crate::envelope::parse_envelope;

    #[test]
    fn transmitters_are_unique() {
        let source = MockCodeSource::new(Duration::from_secs(1), 50, 0.0);
        let ids: HashSet<_> = source.transmitters().iter().map(|t| t.device_id).collect();

        assert_eq!(ids.len(), 50);
        assert!(source.transmitters().iter().all(|t| t.selector < 8));
    }

    #[test]
    fn generated_codes_decode_to_the_transmitter() {
        let mut rng = rand::rng();

        for selector in 0..8 {
            let transmitter = MockTransmitter {
                device_id: DeviceId(0x0A1B),
                selector,
                auto_off: true,
            };

            for _ in 0..100 {
                let reading = decode_u32(transmitter.random_code(&mut rng)).unwrap();
                assert_eq!(reading.kind, transmitter.kind());
                assert_eq!(reading.device_id, transmitter.device_id);
                if reading.kind.is_binary() {
                    assert_eq!(reading.auto_off, Some(true));
                }
            }
        }
    }

    #[test]
    fn temperatures_stay_in_range() {
        let mut rng = rand::rng();
        let transmitter = MockTransmitter {
            device_id: DeviceId(1),
            selector: 0,
            auto_off: false,
        };

        for _ in 0..200 {
            let reading = decode_u32(transmitter.random_code(&mut rng)).unwrap();
            let value = reading.value.as_f64().unwrap();
            assert!((-15.0..40.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn clean_payloads_are_valid_envelopes() {
        let source = MockCodeSource::new(Duration::from_secs(1), 3, 0.0);

        for _ in 0..50 {
            let payload = next_payload(source.transmitters(), 0.0).unwrap();
            let code = parse_envelope(&payload).unwrap();
            assert!(u32::try_from(code).is_ok());
        }
    }

    #[test]
    fn no_transmitters_no_payload() {
        assert!(next_payload(&[], 0.0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn emits_until_cancelled() {
        let source = MockCodeSource::new(Duration::from_millis(100), 2, 0.0);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        source.start(tx, cancel.clone()).await.unwrap();

        for _ in 0..3 {
            match rx.recv().await {
                Some(PipelineInput::Payload(payload)) => assert!(parse_envelope(&payload).is_ok()),
                other => panic!("unexpected input {other:?}"),
            }
        }

        cancel.cancel();
        while rx.recv().await.is_some() {}
    }
}
