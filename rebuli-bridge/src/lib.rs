pub mod config;
pub mod envelope;
pub mod pipeline;
pub mod platform;
pub mod registry;
pub mod scheduler;
pub mod settings;
pub mod source;
pub mod state;

pub use config::{
    BridgeConfig, Config, ConfigError, MqttPlatformConfig, MqttSourceConfig, PlatformConfig,
    ServerConfig, SourceConfig,
};
pub use envelope::{EnvelopeError, parse_envelope};
pub use pipeline::{IngestError, IngestOutcome, Pipeline, PipelineInput, RejectReason};
pub use platform::log::LogPlatform;
pub use platform::memory::MemoryPlatform;
pub use platform::mqtt::MqttPlatform;
pub use platform::{BusEvent, EntityHandle, EntityPlatform, EntitySpec, wait_for_platform};
pub use registry::{AcceptOutcome, DeviceRecord, DeviceRegistry, DeviceSnapshot};
pub use scheduler::{AutoOffExpired, AutoOffScheduler, AutoOffTimer, TimerChange};
pub use settings::{AllowList, RetryPolicy, Settings};
pub use source::CodeSource;
pub use source::mock::MockCodeSource;
pub use source::mqtt::MqttCodeSource;
pub use state::{BridgeState, BridgeStats};
