//! City gateway - discovery, health and command hub for smart-city devices
//!
//! Module structure:
//! - `domain/` - Device kinds, records, commands and wire messages
//! - `io/` - External interfaces (HTTP API, device transport, MQTT, probes)
//! - `services/` - Registry, discovery, health monitor, dispatcher, telemetry
//! - `device/` - Simulated actuators and sensors (used by the device binaries)
//! - `infra/` - Infrastructure (Config, Metrics, Broker, Logging)

use city_gateway::infra::{broker, logging, Config, Metrics};
use city_gateway::io::http_api::{self, ApiState};
use city_gateway::io::mqtt::{self, TelemetryIngest};
use city_gateway::io::{HttpDeviceClient, TcpProbe};
use city_gateway::services::{
    DeviceRegistry, DiscoveryEngine, DiscoverySettings, Dispatcher, HealthMonitor, TelemetryStore,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// City gateway - device discovery, health monitoring and command dispatch
#[derive(Parser, Debug)]
#[command(name = "city-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    info!(git_hash = %env!("CITY_GIT_HASH"), "city-gateway starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        gateway_id = %config.gateway_id(),
        http_port = %config.http_port(),
        discovery_target = %config.discovery_target(),
        discovery_window_ms = %config.discovery_window().as_millis(),
        discovery_interval_secs = %config.discovery_interval().as_secs(),
        health_interval_secs = %config.health_interval().as_secs(),
        sensor_staleness_secs = %config.sensor_staleness().as_secs(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared state
    let registry = Arc::new(DeviceRegistry::new());
    let telemetry = Arc::new(TelemetryStore::new(config.history_capacity()));
    let metrics = Arc::new(Metrics::new());

    // Telemetry ingestion
    let ingest = Arc::new(TelemetryIngest::new(&config, registry.clone(), telemetry.clone(), metrics.clone()));
    let mqtt_config = config.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = mqtt::start_mqtt_client(&mqtt_config, ingest, mqtt_shutdown).await {
            error!(error = %e, "MQTT client error");
        }
    });

    let discovery = Arc::new(DiscoveryEngine::new(
        DiscoverySettings::from_config(&config),
        registry.clone(),
        metrics.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        telemetry.clone(),
        Arc::new(HttpDeviceClient::new(config.dispatch_timeout())),
        metrics.clone(),
        config.dispatch_timeout(),
    ));

    // HTTP API
    let state = Arc::new(ApiState {
        gateway_id: config.gateway_id().to_string(),
        registry: registry.clone(),
        telemetry: telemetry.clone(),
        dispatcher,
        discovery: discovery.clone(),
        metrics: metrics.clone(),
    });
    let bind_address = config.http_bind_address().to_string();
    let http_port = config.http_port();
    let http_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = http_api::start_http_api(&bind_address, http_port, state, http_shutdown).await {
            error!(error = %e, "HTTP API error");
        }
    });

    // Periodic discovery
    tokio::spawn(discovery.run(shutdown_rx.clone()));

    // Health monitor
    let monitor = Arc::new(HealthMonitor::new(
        registry.clone(),
        telemetry,
        Arc::new(TcpProbe::new(config.probe_timeout())),
        metrics.clone(),
        config.health_interval(),
        config.sensor_staleness(),
    ));
    tokio::spawn(monitor.run(shutdown_rx.clone()));

    // Metrics reporter
    let metrics_interval = config.metrics_interval_secs();
    let mut metrics_shutdown = shutdown_rx.clone();
    let metrics_registry = registry.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics.set_registered_devices(metrics_registry.len());
                    metrics.report().log();
                }
                _ = metrics_shutdown.changed() => {
                    if *metrics_shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });

    info!("gateway_started");

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // Give loops a moment to observe the signal and log
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!(devices = %registry.len(), "city-gateway shutdown complete");
    Ok(())
}
