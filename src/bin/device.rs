//! Simulated actuator - camera, streetlight or traffic signal
//!
//! Runs the kind's state machine behind an HTTP command server and answers
//! multicast discovery requests.
//!
//! Usage:
//!   cargo run --bin city-device -- --kind CAMERA --id CAM001 --port 50052
//!   cargo run --bin city-device -- --kind TRAFFIC_SIGNAL --id SIG001 --port 50054

use city_gateway::device::{
    responder::bind_multicast, Actuator, DeviceIdentity, DeviceServer, DiscoveryResponder,
};
use city_gateway::domain::types::DeviceKind;
use city_gateway::infra::logging;
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "city-device")]
#[command(about = "Simulated smart-city actuator")]
struct Args {
    /// Device kind: CAMERA, STREETLIGHT or TRAFFIC_SIGNAL
    #[arg(short, long)]
    kind: DeviceKind,

    /// Device id reported in discovery and registration
    #[arg(short, long)]
    id: String,

    /// Command server port
    #[arg(short, long)]
    port: u16,

    /// Host the gateway should use to reach the command server
    #[arg(long, default_value = "127.0.0.1")]
    advertise_host: String,

    /// Multicast group to join for discovery
    #[arg(long, default_value = "224.0.0.1")]
    multicast_group: Ipv4Addr,

    /// Discovery port
    #[arg(long, default_value_t = 10000)]
    discovery_port: u16,

    /// Come back online this many seconds after Deactivate (never when unset)
    #[arg(long)]
    reactivate_after_secs: Option<u64>,

    /// Traffic signal cycle poll increment in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let args = Args::parse();

    let Some(actuator) = Actuator::for_kind(args.kind, Duration::from_millis(args.poll_ms)) else {
        error!(kind = %args.kind, "not_an_actuator");
        return Err(format!("{} is a sensor kind; use city-sensor", args.kind).into());
    };
    let actuator = Arc::new(actuator);
    actuator.start();

    let identity = DeviceIdentity {
        id: args.id.clone(),
        kind: args.kind,
        address: Some(format!("{}:{}", args.advertise_host, args.port)),
    };
    info!(
        git_hash = %env!("CITY_GIT_HASH"),
        device_id = %identity.id,
        kind = %identity.kind,
        address = ?identity.address,
        "device starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let socket = bind_multicast(args.multicast_group, args.discovery_port)?;
    let responder = DiscoveryResponder::new(identity).with_actuator(actuator.clone());
    let responder_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        responder.run(socket, responder_shutdown).await;
    });

    let server = Arc::new(DeviceServer::new(
        args.id,
        actuator,
        args.reactivate_after_secs.map(Duration::from_secs),
    ));
    let bind = SocketAddr::from(([0, 0, 0, 0], args.port));
    let server_task = tokio::spawn(server.serve(bind, shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown_signal_received");
            let _ = shutdown_tx.send(true);
        }
        result = server_task => {
            match result {
                Ok(Err(e)) => error!(error = %e, "device_server_failed"),
                Err(e) => error!(error = %e, "device_server_panicked"),
                Ok(Ok(())) => {}
            }
            let _ = shutdown_tx.send(true);
        }
    }

    Ok(())
}
