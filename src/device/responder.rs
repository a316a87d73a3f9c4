//! Device-side discovery responder
//!
//! Listens on the multicast group and answers every `DISCOVERY_REQUEST` with a
//! unicast `DISCOVERY_RESPONSE` to `sourceIp:replyPort`. When the request
//! advertises a registration port the device also fires a best-effort
//! `POST /registry` at the gateway; nothing waits on it and failures are only
//! logged. A responder bound to an actuator stays silent while that actuator
//! is deactivated, so discovery never re-adds a device that cannot take
//! commands.

use crate::device::Actuator;
use crate::domain::types::DeviceKind;
use crate::domain::wire::{self, DiscoveryRequest, DiscoveryResponse, RegistrationRequest, DISCOVERY_REQUEST};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: String,
    pub kind: DeviceKind,
    /// `host:port` of the command server; sensors have none
    pub address: Option<String>,
}

/// Bind a UDP socket on `port` with address reuse and join `group` on all interfaces
pub fn bind_multicast(group: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

pub struct DiscoveryResponder {
    identity: DeviceIdentity,
    http: reqwest::Client,
    /// Sensors have no actuator and always answer
    actuator: Option<Arc<Actuator>>,
}

impl DiscoveryResponder {
    pub fn new(identity: DeviceIdentity) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REGISTRATION_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { identity, http, actuator: None }
    }

    /// Only answer while `actuator` is active
    pub fn with_actuator(mut self, actuator: Arc<Actuator>) -> Self {
        self.actuator = Some(actuator);
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn is_active(&self) -> bool {
        self.actuator.as_ref().map_or(true, |a| a.is_active())
    }

    /// Build the reply for one datagram, or `None` when it is not a discovery
    /// request or the device is inactive
    pub fn answer(&self, payload: &[u8]) -> Option<(DiscoveryRequest, DiscoveryResponse)> {
        if !self.is_active() {
            debug!(device_id = %self.identity.id, "discovery_ignored_inactive");
            return None;
        }

        match wire::message_type(payload).as_deref() {
            Some(DISCOVERY_REQUEST) => {}
            Some(other) => {
                debug!(msg_type = %other, "discovery_datagram_ignored");
                return None;
            }
            None => {
                debug!("discovery_datagram_malformed");
                return None;
            }
        }

        let request: DiscoveryRequest = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "discovery_request_malformed");
                return None;
            }
        };

        let response = DiscoveryResponse::new(
            self.identity.id.clone(),
            self.identity.kind,
            self.identity.address.clone(),
            request.correlation_id.clone(),
        );
        Some((request, response))
    }

    /// Answer a datagram received from `src` on `socket`
    pub async fn respond(&self, socket: &UdpSocket, payload: &[u8], src: SocketAddr) -> bool {
        let Some((request, response)) = self.answer(payload) else {
            return false;
        };

        let reply_to = SocketAddr::new(src.ip(), request.reply_port);
        match serde_json::to_vec(&response) {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, reply_to).await {
                    warn!(error = %e, to = %reply_to, "discovery_reply_failed");
                } else {
                    debug!(
                        to = %reply_to,
                        requester = %request.requester_id,
                        correlation_id = %request.correlation_id,
                        "discovery_replied"
                    );
                }
            }
            Err(e) => warn!(error = %e, "discovery_reply_encode_failed"),
        }

        if let Some(port) = request.registration_port {
            let url = format!("http://{}/registry", SocketAddr::new(src.ip(), port));
            self.spawn_registration(url);
        }
        true
    }

    fn spawn_registration(&self, url: String) {
        let body = RegistrationRequest {
            device_id: self.identity.id.clone(),
            kind: self.identity.kind,
            address: self.identity.address.clone(),
            capabilities: self.identity.kind.capabilities(),
        };
        let http = self.http.clone();
        tokio::spawn(async move {
            let payload = match serde_json::to_vec(&body) {
                Ok(p) => p,
                Err(e) => {
                    debug!(error = %e, "registration_encode_failed");
                    return;
                }
            };
            let result = http
                .post(&url)
                .header("Content-Type", "application/json")
                .body(payload)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(url = %url, device_id = %body.device_id, "registration_sent");
                }
                Ok(resp) => debug!(url = %url, status = %resp.status(), "registration_refused"),
                Err(e) => debug!(url = %url, error = %e, "registration_failed"),
            }
        });
    }

    /// Serve discovery requests on `socket` until shutdown
    pub async fn run(&self, socket: UdpSocket, mut shutdown: watch::Receiver<bool>) {
        info!(
            device_id = %self.identity.id,
            kind = %self.identity.kind,
            local = ?socket.local_addr().ok(),
            "discovery_responder_started"
        );
        let mut buf = vec![0u8; 4096];

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            self.respond(&socket, &buf[..len], src).await;
                        }
                        Err(e) => {
                            debug!(error = %e, "discovery_recv_error");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(device_id = %self.identity.id, "discovery_responder_shutdown");
                        return;
                    }
                }
            }
        }
    }
}
