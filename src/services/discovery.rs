//! Discovery engine - multicast a request, collect replies, commit the round
//!
//! A round binds a fresh ephemeral UDP socket as its reply endpoint, sends a
//! single `DISCOVERY_REQUEST` carrying a new correlation id, and listens until
//! the window closes. Replies are merged by device id (last one wins) and the
//! result replaces the registry through [`DeviceRegistry::commit_round`].
//!
//! Rounds never overlap: an on-demand round waits for a running periodic
//! round to finish and then runs its own.

use crate::domain::types::{DeviceRecord, RecordSource};
use crate::domain::wire::{DiscoveryRequest, DiscoveryResponse, DISCOVERY_RESPONSE};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::registry::DeviceRegistry;
use chrono::Utc;
use rustc_hash::FxHashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Largest datagram a discovery reply may occupy
const MAX_DATAGRAM: usize = 4096;

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub requester_id: String,
    /// Where requests are sent; normally the multicast group
    pub target: SocketAddr,
    pub window: Duration,
    pub interval: Duration,
    pub ttl: u32,
    /// HTTP port advertised so devices can also `POST /registry`
    pub registration_port: Option<u16>,
}

impl DiscoverySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            requester_id: config.gateway_id().to_string(),
            target: config.discovery_target(),
            window: config.discovery_window(),
            interval: config.discovery_interval(),
            ttl: config.discovery_ttl(),
            registration_port: config.registration_enabled().then_some(config.http_port()),
        }
    }
}

/// Responses collected during one round
pub struct DiscoveryRound {
    correlation_id: String,
    found: FxHashMap<String, DeviceRecord>,
    ignored: usize,
}

impl DiscoveryRound {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into(), found: FxHashMap::default(), ignored: 0 }
    }

    /// Offer one datagram to the round; returns whether it was taken
    pub fn accept(&mut self, payload: &[u8], src: SocketAddr) -> bool {
        let response: DiscoveryResponse = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => {
                debug!(src = %src, error = %e, "discovery_reply_malformed");
                self.ignored += 1;
                return false;
            }
        };

        if response.msg_type != DISCOVERY_RESPONSE {
            debug!(src = %src, msg_type = %response.msg_type, "discovery_reply_wrong_type");
            self.ignored += 1;
            return false;
        }

        if response.correlation_id != self.correlation_id {
            debug!(
                src = %src,
                device_id = %response.device_id,
                correlation_id = %response.correlation_id,
                "discovery_reply_stale"
            );
            self.ignored += 1;
            return false;
        }

        debug!(src = %src, device_id = %response.device_id, kind = %response.kind, "discovery_reply");
        let record = DeviceRecord::new(
            response.device_id.clone(),
            response.kind,
            response.address,
            RecordSource::Discovery,
        )
        .with_capabilities(response.capabilities)
        .with_discovered_at(Utc::now());

        self.found.insert(response.device_id, record);
        true
    }

    pub fn len(&self) -> usize {
        self.found.len()
    }

    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }

    pub fn ignored(&self) -> usize {
        self.ignored
    }

    pub fn into_records(self) -> FxHashMap<String, DeviceRecord> {
        self.found
    }
}

pub struct DiscoveryEngine {
    settings: DiscoverySettings,
    registry: Arc<DeviceRegistry>,
    metrics: Arc<Metrics>,
    round_lock: Mutex<()>,
}

impl DiscoveryEngine {
    pub fn new(
        settings: DiscoverySettings,
        registry: Arc<DeviceRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { settings, registry, metrics, round_lock: Mutex::new(()) }
    }

    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    /// Run one round and return the number of distinct devices that answered
    pub async fn run_discovery(&self) -> io::Result<usize> {
        let _round = self.round_lock.lock().await;

        match self.round().await {
            Ok(found) => {
                self.metrics.record_discovery_round(found);
                Ok(found)
            }
            Err(e) => {
                self.metrics.record_discovery_failure();
                Err(e)
            }
        }
    }

    async fn round(&self) -> io::Result<usize> {
        let token = self.registry.begin_round();

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_multicast_ttl_v4(self.settings.ttl)?;
        let reply_port = socket.local_addr()?.port();

        let correlation_id = Uuid::now_v7().to_string();
        let request = DiscoveryRequest::new(
            self.settings.requester_id.clone(),
            reply_port,
            correlation_id.clone(),
            self.settings.registration_port,
        );
        let payload = serde_json::to_vec(&request).map_err(io::Error::other)?;
        socket.send_to(&payload, self.settings.target).await?;

        info!(
            correlation_id = %correlation_id,
            target = %self.settings.target,
            reply_port = %reply_port,
            window_ms = %self.settings.window.as_millis(),
            "discovery_started"
        );

        let deadline = Instant::now() + self.settings.window;
        let mut round = DiscoveryRound::new(correlation_id.clone());
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, src))) => {
                    round.accept(&buf[..len], src);
                }
                Ok(Err(e)) => {
                    // ICMP errors from earlier sends surface here; keep listening
                    debug!(error = %e, "discovery_recv_error");
                }
                Err(_) => break,
            }
        }

        let found = round.len();
        let ignored = round.ignored();
        let total = self.registry.commit_round(token, round.into_records());

        info!(
            correlation_id = %correlation_id,
            devices_found = %found,
            ignored = %ignored,
            registry_size = %total,
            "discovery_completed"
        );
        Ok(found)
    }

    /// Periodic discovery; the first round runs immediately
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_discovery().await {
                        error!(error = %e, "discovery_round_failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("discovery_shutdown");
                        return;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryEngine").field("settings", &self.settings).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::DeviceKind;

    fn src() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn reply(device_id: &str, kind: DeviceKind, correlation: &str, port: u16) -> Vec<u8> {
        let response = DiscoveryResponse::new(
            device_id,
            kind,
            kind.is_actuator().then(|| format!("127.0.0.1:{port}")),
            correlation,
        );
        serde_json::to_vec(&response).unwrap()
    }

    #[test]
    fn test_round_collapses_duplicates_last_wins() {
        let mut round = DiscoveryRound::new("c1");
        assert!(round.accept(&reply("CAM001", DeviceKind::Camera, "c1", 1), src()));
        assert!(round.accept(&reply("CAM001", DeviceKind::Camera, "c1", 2), src()));
        assert!(round.accept(&reply("TEMP001", DeviceKind::SensorTemperature, "c1", 0), src()));

        assert_eq!(round.len(), 2);
        let records = round.into_records();
        assert_eq!(records["CAM001"].address.as_deref(), Some("127.0.0.1:2"));
        assert!(records["TEMP001"].address.is_none());
        assert_eq!(records["TEMP001"].capabilities, vec!["publish_telemetry".to_string()]);
    }

    #[test]
    fn test_round_ignores_foreign_and_malformed() {
        let mut round = DiscoveryRound::new("c1");
        assert!(!round.accept(&reply("CAM001", DeviceKind::Camera, "other", 1), src()));
        assert!(!round.accept(b"{not json", src()));

        let request = DiscoveryRequest::new("gw", 1, "c1", None);
        assert!(!round.accept(&serde_json::to_vec(&request).unwrap(), src()));

        assert!(round.is_empty());
        assert_eq!(round.ignored(), 3);
    }

    #[tokio::test]
    async fn test_empty_round_returns_zero() {
        // Nobody listens on the target; the round just times out
        let sink = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = sink.local_addr().unwrap();

        let registry = Arc::new(DeviceRegistry::new());
        registry.upsert(DeviceRecord::new(
            "OLD001",
            DeviceKind::Camera,
            Some("127.0.0.1:1".into()),
            RecordSource::Discovery,
        ));
        let metrics = Arc::new(Metrics::new());
        let engine = DiscoveryEngine::new(
            DiscoverySettings {
                requester_id: "gw-test".into(),
                target,
                window: Duration::from_millis(100),
                interval: Duration::from_secs(120),
                ttl: 1,
                registration_port: None,
            },
            registry.clone(),
            metrics.clone(),
        );

        assert_eq!(engine.run_discovery().await.unwrap(), 0);
        assert!(registry.is_empty());
        assert_eq!(metrics.discovery_rounds(), 1);
    }

    #[tokio::test]
    async fn test_round_collects_replies_from_responder() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = responder.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let (len, from) = responder.recv_from(&mut buf).await.unwrap();
            let request: DiscoveryRequest = serde_json::from_slice(&buf[..len]).unwrap();
            let reply_to = SocketAddr::new(from.ip(), request.reply_port);
            for (id, kind) in [("CAM001", DeviceKind::Camera), ("SIG001", DeviceKind::TrafficSignal)] {
                let payload = reply(id, kind, &request.correlation_id, 9);
                responder.send_to(&payload, reply_to).await.unwrap();
            }
            let stale = reply("CAM999", DeviceKind::Camera, "previous-round", 9);
            responder.send_to(&stale, reply_to).await.unwrap();
        });

        let registry = Arc::new(DeviceRegistry::new());
        let engine = DiscoveryEngine::new(
            DiscoverySettings {
                requester_id: "gw-test".into(),
                target,
                window: Duration::from_millis(300),
                interval: Duration::from_secs(120),
                ttl: 1,
                registration_port: Some(5000),
            },
            registry.clone(),
            Arc::new(Metrics::new()),
        );

        assert_eq!(engine.run_discovery().await.unwrap(), 2);
        let ids: Vec<String> = registry.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["CAM001", "SIG001"]);
    }
}
