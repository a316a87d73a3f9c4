//! Per-actuator HTTP command server
//!
//! Routes:
//! - `POST /command` - `{command, params}` evaluated by the state machine
//! - `GET /status` - kind-specific state
//! - `GET /health` - liveness
//!
//! Once a command leaves the device inactive the listener is dropped, so new
//! connections are refused and the gateway's probe fails. With
//! `reactivate_after` set the device comes back and re-binds after that delay.

use crate::device::Actuator;
use crate::domain::command::{Command, CommandRequest};
use crate::io::http::{error_response, json_response, not_found, read_json, text_response, HttpResponse};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};

pub struct DeviceServer {
    device_id: String,
    actuator: Arc<Actuator>,
    reactivate_after: Option<Duration>,
    offline: Notify,
}

impl DeviceServer {
    pub fn new(
        device_id: impl Into<String>,
        actuator: Arc<Actuator>,
        reactivate_after: Option<Duration>,
    ) -> Self {
        Self { device_id: device_id.into(), actuator, reactivate_after, offline: Notify::new() }
    }

    pub fn actuator(&self) -> &Arc<Actuator> {
        &self.actuator
    }

    async fn handle_request(
        self: Arc<Self>,
        req: Request<hyper::body::Incoming>,
    ) -> Result<HttpResponse, Infallible> {
        let response = match (req.method(), req.uri().path()) {
            (&Method::POST, "/command") => self.handle_command(req).await,
            (&Method::GET, "/status") => json_response(
                StatusCode::OK,
                &json!({
                    "deviceId": self.device_id,
                    "kind": self.actuator.kind(),
                    "state": self.actuator.status(),
                }),
            ),
            (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
            _ => not_found(),
        };
        Ok(response)
    }

    async fn handle_command(&self, req: Request<hyper::body::Incoming>) -> HttpResponse {
        let request: CommandRequest = match read_json(req).await {
            Ok(r) => r,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, None, e),
        };

        let command = match Command::parse(self.actuator.kind(), &request.command, &request.params) {
            Ok(c) => c,
            Err(e) => {
                warn!(device_id = %self.device_id, command = %request.command, error = %e, "command_invalid");
                return error_response(StatusCode::BAD_REQUEST, None, e);
            }
        };

        let was_active = self.actuator.is_active();
        let reply = self.actuator.apply(&command);
        info!(
            device_id = %self.device_id,
            command = %command.name(),
            outcome = ?reply.outcome,
            message = %reply.message,
            "command_applied"
        );

        if was_active && !self.actuator.is_active() {
            self.offline.notify_one();
        }

        json_response(StatusCode::OK, &reply)
    }

    /// Serve until shutdown, closing and re-opening the listener around deactivation
    pub async fn serve(
        self: Arc<Self>,
        bind: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let mut listener = Some(TcpListener::bind(bind).await?);
        info!(device_id = %self.device_id, kind = %self.actuator.kind(), addr = %bind, "device_server_started");

        loop {
            let Some(active) = listener.as_ref() else {
                // Offline: wait for reactivation or shutdown
                let Some(delay) = self.reactivate_after else {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                    info!(device_id = %self.device_id, "device_server_shutdown");
                    return Ok(());
                };
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        self.actuator.reactivate();
                        listener = Some(TcpListener::bind(bind).await?);
                        info!(device_id = %self.device_id, addr = %bind, "device_reactivated");
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!(device_id = %self.device_id, "device_server_shutdown");
                            return Ok(());
                        }
                    }
                }
                continue;
            };

            tokio::select! {
                result = active.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let io = TokioIo::new(stream);
                            let server = self.clone();
                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let server = server.clone();
                                    async move { server.handle_request(req).await }
                                });
                                // One request per connection so nothing outlives the listener
                                if let Err(e) = http1::Builder::new()
                                    .keep_alive(false)
                                    .serve_connection(io, service)
                                    .await
                                {
                                    error!(error = %e, "device_http_error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "device_accept_error");
                        }
                    }
                }
                _ = self.offline.notified() => {
                    listener = None;
                    warn!(device_id = %self.device_id, "device_offline");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(device_id = %self.device_id, "device_server_shutdown");
                        return Ok(());
                    }
                }
            }
        }
    }
}
