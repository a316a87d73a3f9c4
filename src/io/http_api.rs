//! Gateway HTTP API
//!
//! Registration, registry queries, command dispatch, on-demand discovery,
//! telemetry history plus `/health` and Prometheus `/metrics`.

use crate::domain::command::CommandRequest;
use crate::domain::types::{DeviceRecord, RecordSource};
use crate::domain::wire::RegistrationRequest;
use crate::infra::metrics::Metrics;
use crate::io::http::{error_response, json_response, not_found, read_json, text_response, HttpResponse};
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::discovery::DiscoveryEngine;
use crate::services::dispatcher::Dispatcher;
use crate::services::registry::DeviceRegistry;
use crate::services::telemetry::{SensorChannel, TelemetryStore};
use bytes::Bytes;
use chrono::Utc;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Readings returned per channel by `GET /telemetry` without `?limit=`
const DEFAULT_TELEMETRY_LIMIT: usize = 20;

/// Everything the handlers need, shared across connections
pub struct ApiState {
    pub gateway_id: String,
    pub registry: Arc<DeviceRegistry>,
    pub telemetry: Arc<TelemetryStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub discovery: Arc<DiscoveryEngine>,
    pub metrics: Arc<Metrics>,
}

/// Sub-resource addressed under `/devices/{id}`
enum DeviceRoute<'a> {
    Record(&'a str),
    Status(&'a str),
    Command(&'a str),
}

fn device_route(path: &str) -> Option<DeviceRoute<'_>> {
    let rest = path.strip_prefix("/devices/")?;
    let mut parts = rest.splitn(2, '/');
    let id = parts.next().filter(|id| !id.is_empty())?;
    match parts.next() {
        None | Some("") => Some(DeviceRoute::Record(id)),
        Some("status") => Some(DeviceRoute::Status(id)),
        Some("command") => Some(DeviceRoute::Command(id)),
        Some(_) => None,
    }
}

fn query_limit(query: Option<&str>) -> usize {
    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter_map(|pair| pair.strip_prefix("limit="))
        .find_map(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_TELEMETRY_LIMIT)
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ApiState>,
) -> Result<HttpResponse, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::POST, "/registry") => handle_registration(req, &state).await,
        (&Method::GET, "/devices") => list_devices(&state),
        (&Method::POST, "/discovery") => trigger_discovery(&state).await,
        (&Method::GET, "/telemetry") => telemetry_history(&state, query_limit(req.uri().query())),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        (&Method::GET, "/metrics") => {
            state.metrics.set_registered_devices(state.registry.len());
            let body = format_prometheus_metrics(&state.metrics, &state.gateway_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
        (m, p) => match (m, device_route(p)) {
            (&Method::GET, Some(DeviceRoute::Record(id))) => match state.registry.get(id) {
                Some(record) => json_response(StatusCode::OK, &record),
                None => error_response(StatusCode::NOT_FOUND, Some("DeviceNotFound"), format!("device not found: {id}")),
            },
            (&Method::GET, Some(DeviceRoute::Status(id))) => device_status(&state, id).await,
            (&Method::POST, Some(DeviceRoute::Command(id))) => {
                let id = id.to_string();
                dispatch_command(req, &state, &id).await
            }
            _ => not_found(),
        },
    };
    Ok(response)
}

async fn handle_registration(req: Request<hyper::body::Incoming>, state: &ApiState) -> HttpResponse {
    let body: RegistrationRequest = match read_json(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, None, e),
    };

    if body.device_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, None, "deviceId must not be empty");
    }
    if body.kind.is_actuator() && body.address.is_none() {
        return error_response(StatusCode::BAD_REQUEST, None, "actuators must register an address");
    }

    let record = DeviceRecord::new(body.device_id.clone(), body.kind, body.address, RecordSource::Registration)
        .with_capabilities(body.capabilities);
    state.registry.upsert(record);
    state.metrics.record_registration();

    info!(device_id = %body.device_id, kind = %body.kind, "device_registered");
    json_response(StatusCode::OK, &json!({ "registered": body.device_id }))
}

fn list_devices(state: &ApiState) -> HttpResponse {
    let devices = state.registry.snapshot();
    let actuators = devices.iter().filter(|d| d.kind.is_actuator()).count();
    let sensors = devices.iter().filter(|d| d.kind.is_sensor()).count();
    json_response(
        StatusCode::OK,
        &json!({
            "devices": devices,
            "total": devices.len(),
            "actuators": actuators,
            "sensors": sensors,
            "timestamp": Utc::now(),
        }),
    )
}

async fn device_status(state: &ApiState, id: &str) -> HttpResponse {
    match state.dispatcher.status(id).await {
        Ok((record, status)) => json_response(
            StatusCode::OK,
            &json!({
                "deviceId": record.id,
                "kind": record.kind,
                "status": status,
                "timestamp": Utc::now(),
            }),
        ),
        Err(e) => error_response(e.status_code(), Some(e.code()), &e),
    }
}

async fn dispatch_command(req: Request<hyper::body::Incoming>, state: &ApiState, id: &str) -> HttpResponse {
    let body: CommandRequest = match read_json(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, None, e),
    };

    match state.dispatcher.dispatch(id, &body.command, &body.params).await {
        Ok(reply) => json_response(StatusCode::OK, &json!({ "deviceId": id, "result": reply })),
        Err(e) => error_response(e.status_code(), Some(e.code()), &e),
    }
}

async fn trigger_discovery(state: &ApiState) -> HttpResponse {
    match state.discovery.run_discovery().await {
        Ok(found) => json_response(
            StatusCode::OK,
            &json!({ "devicesFound": found, "devices": state.registry.snapshot() }),
        ),
        Err(e) => {
            warn!(error = %e, "discovery_trigger_failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, None, format!("discovery failed: {e}"))
        }
    }
}

fn telemetry_history(state: &ApiState, limit: usize) -> HttpResponse {
    json_response(
        StatusCode::OK,
        &json!({
            "temperature": state.telemetry.recent(SensorChannel::Temperature, limit),
            "airQuality": state.telemetry.recent(SensorChannel::AirQuality, limit),
            "timestamp": Utc::now(),
        }),
    )
}

/// Serve the API on `listener` until shutdown
pub async fn serve(
    listener: TcpListener,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), gateway = %state.gateway_id, "http_api_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_api_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_api_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

/// Bind `addr:port` and serve the API until shutdown
pub async fn start_http_api(
    bind_address: &str,
    port: u16,
    state: Arc<ApiState>,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind((bind_address, port)).await?;
    serve(listener, state, shutdown).await
}
