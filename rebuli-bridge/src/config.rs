use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::settings::{AllowList, RetryPolicy, Settings};

pub const DEFAULT_TOPIC: &str = "home/rebuli_rf/received";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub server: ServerConfig,
    pub source: SourceConfig,
    pub platform: PlatformConfig,
}

/// Options that can change while the bridge runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Device ids to accept, as hex strings. Empty accepts every device.
    pub allowed_ids: Vec<String>,
    /// Seconds before a self-resetting binary device reports off again
    pub auto_off_timeout_secs: u64,
    /// How many times to probe the entity platform before giving up
    pub platform_retry_attempts: u32,
    /// Delay between platform probes, in milliseconds
    pub platform_retry_delay_ms: u64,
}

impl BridgeConfig {
    pub fn settings(&self) -> Settings {
        Settings {
            allowed_ids: self.allowed_ids.iter().collect::<AllowList>(),
            auto_off_timeout: Duration::from_secs(self.auto_off_timeout_secs),
            platform_retry: RetryPolicy {
                attempts: self.platform_retry_attempts,
                delay: Duration::from_millis(self.platform_retry_delay_ms),
            },
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            allowed_ids: Vec::new(),
            auto_off_timeout_secs: 2,
            platform_retry_attempts: 5,
            platform_retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address for the HTTP server to listen on
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8082)),
        }
    }
}

/// Where RF codes come from.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Mqtt(MqttSourceConfig),
    Mock {
        /// Interval in milliseconds between generated codes
        interval_ms: u64,
        /// Number of simulated transmitters
        device_count: u16,
        /// Share of messages replaced by garbage, between 0 and 1
        #[serde(default)]
        noise_ratio: f64,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Mqtt(MqttSourceConfig::default())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSourceConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Topic the RF receivers publish `{"code": ...}` messages on
    pub topic: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttSourceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "rebuli-rf-bridge".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            keep_alive_secs: 5,
        }
    }
}

/// Where entities are presented.
#[derive(Debug, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlatformConfig {
    /// Entity changes only show up in the log.
    #[default]
    Log,
    /// Entities are announced through MQTT discovery.
    Mqtt(MqttPlatformConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttPlatformConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub discovery_prefix: String,
    pub state_prefix: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttPlatformConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "rebuli-rf-bridge-entities".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            state_prefix: "rebuli_rf_bridge".to_string(),
            keep_alive_secs: 5,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
