use std::path::PathBuf;
use std::time::Duration;

use axum::extract::State;
use axum::{Json, Router, routing::get};
use clap::Parser;
use rebuli_bridge::{
    BridgeState, BridgeStats, CodeSource, Config, DeviceSnapshot, EntityPlatform, LogPlatform,
    MockCodeSource, MqttCodeSource, MqttPlatform, Pipeline, PlatformConfig, Settings,
    SourceConfig,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rebuli-bridge")]
#[command(about = "Rebuli RF Bridge")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "rebuli-bridge.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tracing=info,rebuli_bridge=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    info!(
        http_addr = %config.server.http_addr,
        allowed_ids = config.bridge.allowed_ids.len(),
        auto_off_timeout_secs = config.bridge.auto_off_timeout_secs,
        "Starting rebuli-bridge"
    );

    let cancel = CancellationToken::new();

    match config.platform {
        PlatformConfig::Log => {
            info!("Using log entity platform");
            run_bridge(config, cli.config, LogPlatform, cancel).await?;
        }
        PlatformConfig::Mqtt(ref mqtt) => {
            info!(host = %mqtt.host, port = mqtt.port, "Using MQTT discovery entity platform");
            let platform = MqttPlatform::connect(mqtt, cancel.clone());
            run_bridge(config, cli.config, platform, cancel).await?;
        }
    }

    Ok(())
}

async fn run_bridge<P: EntityPlatform>(
    config: Config,
    config_path: PathBuf,
    platform: P,
    cancel: CancellationToken,
) -> color_eyre::Result<()> {
    let state = BridgeState::new();
    let (settings_tx, settings_rx) = watch::channel(config.bridge.settings());
    let (tx, rx) = mpsc::channel(256);

    // Spawn the pipeline task
    let mut pipeline = Pipeline::new(platform, settings_rx, tx.clone(), state.clone());
    let cancel_for_pipeline = cancel.clone();
    let pipeline_handle = tokio::spawn(async move {
        pipeline.run(rx, cancel_for_pipeline).await;
    });

    // Start the code source
    match &config.source {
        SourceConfig::Mqtt(mqtt) => {
            MqttCodeSource::new(mqtt.clone())
                .start(tx, cancel.clone())
                .await?;
        }
        SourceConfig::Mock {
            interval_ms,
            device_count,
            noise_ratio,
        } => {
            let source = MockCodeSource::new(
                Duration::from_millis(*interval_ms),
                *device_count,
                *noise_ratio,
            );
            for transmitter in source.transmitters() {
                info!(
                    device_id = %transmitter.device_id,
                    kind = %transmitter.kind(),
                    auto_off = transmitter.auto_off,
                    "Mock transmitter"
                );
            }
            source.start(tx, cancel.clone()).await?;
        }
    }

    let reload_handle = tokio::spawn(reload_settings(config_path, settings_tx, cancel.clone()));

    // HTTP server
    let http_addr = config.server.http_addr;
    let axum_app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/devices", get(devices_handler))
        .with_state(state);
    let axum_listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();

    tokio::select! {
        result = axum::serve(axum_listener, axum_app).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }
    cancel.cancel();

    // Wait for background tasks to complete
    let _ = pipeline_handle.await;
    let _ = reload_handle.await;

    info!("rebuli-bridge shut down complete");
    Ok(())
}

/// Re-read `[bridge]` from the config file on SIGHUP.
#[cfg(unix)]
async fn reload_settings(
    path: PathBuf,
    settings_tx: watch::Sender<Settings>,
    cancel: CancellationToken,
) {
    use tokio::signal::unix::{SignalKind, signal};
    use tracing::warn;

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            error!(error = %e, "Failed to install SIGHUP handler, settings reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }

                match Config::load(&path) {
                    Ok(config) => {
                        let settings = config.bridge.settings();
                        info!(
                            path = ?path,
                            allowed_ids = settings.allowed_ids.len(),
                            auto_off_timeout_secs = settings.auto_off_timeout.as_secs(),
                            "Reloaded bridge settings"
                        );
                        settings_tx.send_replace(settings);
                        info!("Source, platform and server changes need a restart");
                    }
                    Err(e) => {
                        warn!(error = %e, path = ?path, "Failed to reload configuration, keeping current settings");
                    }
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_settings(
    _path: PathBuf,
    _settings_tx: watch::Sender<Settings>,
    cancel: CancellationToken,
) {
    cancel.cancelled().await;
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn stats_handler(State(state): State<BridgeState>) -> Json<BridgeStats> {
    Json(state.stats().await)
}

async fn devices_handler(State(state): State<BridgeState>) -> Json<Vec<DeviceSnapshot>> {
    Json(state.devices().await)
}
