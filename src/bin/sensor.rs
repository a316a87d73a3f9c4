//! Simulated sensor - temperature or air quality
//!
//! Publishes readings over MQTT and answers discovery without a command
//! address.
//!
//! Usage:
//!   cargo run --bin city-sensor -- --kind SENSOR_TEMPERATURE --id TEMP001
//!   cargo run --bin city-sensor -- --kind AIR_QUALITY --id AIR001 --interval-secs 5

use city_gateway::device::responder::bind_multicast;
use city_gateway::device::sensor::{run_publisher, SensorSettings};
use city_gateway::device::{DeviceIdentity, DiscoveryResponder};
use city_gateway::domain::types::DeviceKind;
use city_gateway::infra::logging;
use clap::Parser;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "city-sensor")]
#[command(about = "Simulated smart-city sensor")]
struct Args {
    /// Sensor kind: SENSOR_TEMPERATURE or SENSOR_AIR_QUALITY
    #[arg(short, long)]
    kind: DeviceKind,

    /// Sensor id carried in every reading
    #[arg(short, long)]
    id: String,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    mqtt_port: u16,

    /// Topic override; defaults to the kind's standard topic
    #[arg(long)]
    topic: Option<String>,

    /// Publish interval override in seconds
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Multicast group to join for discovery
    #[arg(long, default_value = "224.0.0.1")]
    multicast_group: Ipv4Addr,

    /// Discovery port
    #[arg(long, default_value_t = 10000)]
    discovery_port: u16,
}

fn default_topic(kind: DeviceKind) -> &'static str {
    match kind {
        DeviceKind::SensorAirQuality => "city/sensors/air_quality",
        _ => "city/sensors/temperature",
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let args = Args::parse();

    if !args.kind.is_sensor() {
        error!(kind = %args.kind, "not_a_sensor");
        return Err(format!("{} is an actuator kind; use city-device", args.kind).into());
    }

    info!(git_hash = %env!("CITY_GIT_HASH"), sensor_id = %args.id, kind = %args.kind, "sensor starting");

    let settings = SensorSettings {
        sensor_id: args.id.clone(),
        kind: args.kind,
        topic: args.topic.unwrap_or_else(|| default_topic(args.kind).to_string()),
        interval: args
            .interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| SensorSettings::default_interval(args.kind)),
        mqtt_host: args.mqtt_host,
        mqtt_port: args.mqtt_port,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let socket = bind_multicast(args.multicast_group, args.discovery_port)?;
    let responder = DiscoveryResponder::new(DeviceIdentity { id: args.id, kind: args.kind, address: None });
    let responder_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        responder.run(socket, responder_shutdown).await;
    });

    let publisher = tokio::spawn(run_publisher(settings, shutdown_rx));

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);
    let _ = publisher.await;
    Ok(())
}
