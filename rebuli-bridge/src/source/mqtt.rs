use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::CodeSource;
use crate::config::MqttSourceConfig;
use crate::pipeline::PipelineInput;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("MQTT topic must not be empty")]
    EmptyTopic,
}

/// Receives `{"code": ...}` messages from an MQTT topic.
pub struct MqttCodeSource {
    config: MqttSourceConfig,
}

impl MqttCodeSource {
    pub fn new(config: MqttSourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CodeSource for MqttCodeSource {
    type Error = SourceError;

    async fn start(
        &self,
        tx: mpsc::Sender<PipelineInput>,
        cancel: CancellationToken,
    ) -> Result<(), Self::Error> {
        if self.config.topic.trim().is_empty() {
            return Err(SourceError::EmptyTopic);
        }

        let mut options = MqttOptions::new(
            &self.config.client_id,
            &self.config.host,
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));

        let (client, event_loop) = AsyncClient::new(options, 64);

        info!(
            host = %self.config.host,
            port = self.config.port,
            topic = %self.config.topic,
            "MQTT code source started"
        );

        tokio::spawn(receive(
            client,
            event_loop,
            self.config.topic.clone(),
            tx,
            cancel,
        ));

        Ok(())
    }
}

#[instrument(name = "mqtt_source", skip_all, fields(%topic))]
async fn receive(
    client: AsyncClient,
    mut event_loop: EventLoop,
    topic: String,
    tx: mpsc::Sender<PipelineInput>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("MQTT code source shutting down");
                break;
            }
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // the broker forgets subscriptions of clean sessions
                    info!("Connected to MQTT broker, subscribing");
                    if let Err(e) = client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
                        error!(error = %e, "Failed to subscribe");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(bytes = publish.payload.len(), "RF message received");
                    if tx.send(PipelineInput::Payload(publish.payload.to_vec())).await.is_err() {
                        info!("Pipeline closed, stopping MQTT code source");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT connection error, reconnecting");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        debug!(error = %e, "MQTT disconnect failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_topic_is_rejected() {
        let source = MqttCodeSource::new(MqttSourceConfig {
            topic: "  ".to_string(),
            ..MqttSourceConfig::default()
        });
        let (tx, _rx) = mpsc::channel(1);

        let result = source.start(tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(SourceError::EmptyTopic)));
    }
}
