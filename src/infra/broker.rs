//! Embedded MQTT broker using rumqttd

use crate::infra::config::Config as AppConfig;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use tracing::{info, warn};

/// Sensors plus the gateway's own telemetry client
const MAX_SENSOR_CONNECTIONS: usize = 512;

/// Upper bound on one JSON telemetry reading
const MAX_READING_BYTES: usize = 16 * 1024;

/// Start the embedded MQTT broker sensors publish to, if enabled
pub fn start_embedded_broker(app_config: &AppConfig) {
    if !app_config.broker_enabled() {
        info!("broker_disabled");
        return;
    }

    let bind_address = app_config.broker_bind_address().to_string();
    let port = app_config.broker_port();

    // Every sensor holds one connection and publishes a reading of a few
    // hundred bytes every few seconds; the gateway is the only subscriber.
    // One segment holds minutes of readings from a few hundred sensors, and
    // the outgoing count covers a burst from all of them between polls.
    let router_config = RouterConfig {
        max_segment_size: 1024 * 1024,
        max_segment_count: 4,
        max_connections: MAX_SENSOR_CONNECTIONS,
        max_outgoing_packet_count: 500,
        initialized_filters: None,
        ..Default::default()
    };

    let addr_str = format!("{}:{}", bind_address, port);
    let listen_addr: SocketAddr = match addr_str.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(error = %e, addr = %addr_str, "broker_invalid_bind_address");
            return;
        }
    };

    let mut servers = HashMap::new();
    servers.insert(
        "v4".to_string(),
        ServerSettings {
            name: "v4".to_string(),
            listen: listen_addr,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                max_payload_size: MAX_READING_BYTES,
                max_inflight_count: 100,
                auth: None,
                dynamic_filters: false,
                external_auth: None,
            },
        },
    );

    let config = Config {
        id: 0,
        router: router_config,
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    };

    thread::spawn(move || {
        let mut broker = Broker::new(config);
        // start() blocks for the life of the broker
        if let Err(e) = broker.start() {
            warn!(error = %e, "broker_start_failed");
        }
    });

    thread::sleep(std::time::Duration::from_millis(100));
    info!(bind_address = %bind_address, port = %port, "broker_started");
}
