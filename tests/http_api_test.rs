//! Gateway HTTP API over a real listener with a scripted device transport

use async_trait::async_trait;
use chrono::Utc;
use city_gateway::domain::command::{CommandReply, CommandRequest};
use city_gateway::domain::wire::TelemetryReading;
use city_gateway::error::TransportError;
use city_gateway::infra::Metrics;
use city_gateway::io::http_api::{serve, ApiState};
use city_gateway::services::{
    DeviceRegistry, DeviceTransport, DiscoveryEngine, DiscoverySettings, Dispatcher, SensorChannel,
    TelemetryStore,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;

/// Applies everything except for addresses listed as unreachable
#[derive(Default)]
struct ScriptedTransport {
    unreachable: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, CommandRequest)>>,
}

#[async_trait]
impl DeviceTransport for ScriptedTransport {
    async fn send_command(
        &self,
        address: &str,
        request: &CommandRequest,
    ) -> Result<CommandReply, TransportError> {
        if self.unreachable.lock().iter().any(|a| a == address) {
            return Err(TransportError::Connect("connection refused".into()));
        }
        self.sent.lock().push((address.to_string(), request.clone()));
        Ok(CommandReply::applied(format!("{} applied", request.command)))
    }

    async fn fetch_status(&self, address: &str) -> Result<Value, TransportError> {
        if self.unreachable.lock().iter().any(|a| a == address) {
            return Err(TransportError::Connect("connection refused".into()));
        }
        Ok(json!({ "systemActive": true, "lampOn": false, "intensity": 100 }))
    }
}

struct Harness {
    base: String,
    http: reqwest::Client,
    registry: Arc<DeviceRegistry>,
    telemetry: Arc<TelemetryStore>,
    transport: Arc<ScriptedTransport>,
    _shutdown: watch::Sender<bool>,
}

impl Harness {
    async fn start() -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let telemetry = Arc::new(TelemetryStore::new(10));
        let metrics = Arc::new(Metrics::new());
        let transport = Arc::new(ScriptedTransport::default());

        // Discovery target with nobody behind it
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = silent.local_addr().unwrap();
        drop(silent);
        let discovery = Arc::new(DiscoveryEngine::new(
            DiscoverySettings {
                requester_id: "gw-test".into(),
                target,
                window: Duration::from_millis(100),
                interval: Duration::from_secs(3600),
                ttl: 1,
                registration_port: None,
            },
            registry.clone(),
            metrics.clone(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            telemetry.clone(),
            transport.clone(),
            metrics.clone(),
            Duration::from_secs(1),
        ));

        let state = Arc::new(ApiState {
            gateway_id: "gw-test".into(),
            registry: registry.clone(),
            telemetry: telemetry.clone(),
            dispatcher,
            discovery,
            metrics,
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(serve(listener, state, shutdown_rx));

        Self {
            base,
            http: reqwest::Client::new(),
            registry,
            telemetry,
            transport,
            _shutdown: shutdown_tx,
        }
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.http.get(format!("{}{}", self.base, path)).send().await.unwrap();
        let status = resp.status().as_u16();
        let body = resp.bytes().await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: &str) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}{}", self.base, path))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        let body = resp.bytes().await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn register_streetlight(&self) {
        let (status, body) = self
            .post("/registry", r#"{"deviceId":"SL001","kind":"STREETLIGHT","address":"127.0.0.1:50061"}"#)
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["registered"], "SL001");
    }
}

#[tokio::test]
async fn test_registration_and_listing() {
    let h = Harness::start().await;
    h.register_streetlight().await;
    let (status, _) = h.post("/registry", r#"{"deviceId":"TEMP001","kind":"SENSOR_TEMPERATURE"}"#).await;
    assert_eq!(status, 200);

    let (status, body) = h.get("/devices").await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 2);
    assert_eq!(body["actuators"], 1);
    assert_eq!(body["sensors"], 1);
    assert_eq!(body["devices"][0]["id"], "SL001");
    assert_eq!(body["devices"][0]["source"], "REGISTRATION");

    let (status, body) = h.get("/devices/SL001").await;
    assert_eq!(status, 200);
    assert_eq!(body["kind"], "STREETLIGHT");
    assert_eq!(body["address"], "127.0.0.1:50061");
}

#[tokio::test]
async fn test_registration_rejects_bad_bodies() {
    let h = Harness::start().await;
    assert_eq!(h.post("/registry", "not json").await.0, 400);
    assert_eq!(h.post("/registry", r#"{"deviceId":"X1","kind":"TOASTER"}"#).await.0, 400);
    assert_eq!(h.post("/registry", r#"{"deviceId":"","kind":"CAMERA","address":"h:1"}"#).await.0, 400);
    assert_eq!(h.post("/registry", r#"{"deviceId":"CAM9","kind":"CAMERA"}"#).await.0, 400);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_command_status_codes() {
    let h = Harness::start().await;
    h.register_streetlight().await;

    let (status, body) = h.post("/devices/NOPE/command", r#"{"command":"LampOn"}"#).await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "DeviceNotFound");

    let (status, body) = h
        .post("/devices/SL001/command", r#"{"command":"SetResolution","params":{"resolution":"4K"}}"#)
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "UnsupportedCommand");

    let (status, body) = h
        .post("/devices/SL001/command", r#"{"command":"SetIntensity","params":{"intensity":150}}"#)
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "InvalidParams");

    assert_eq!(h.post("/devices/SL001/command", "{").await.0, 400);
    assert!(h.transport.sent.lock().is_empty());

    let (status, body) = h
        .post("/devices/SL001/command", r#"{"command":"SetIntensity","params":{"intensity":40}}"#)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["deviceId"], "SL001");
    assert_eq!(body["result"]["outcome"], "applied");

    let sent = h.transport.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "127.0.0.1:50061");
    assert_eq!(sent[0].1.command, "SetIntensity");
    assert_eq!(sent[0].1.params["intensity"], 40);
}

#[tokio::test]
async fn test_transport_failure_is_bad_gateway_and_keeps_device() {
    let h = Harness::start().await;
    h.register_streetlight().await;
    h.transport.unreachable.lock().push("127.0.0.1:50061".into());

    let (status, body) = h.post("/devices/SL001/command", r#"{"command":"LampOn"}"#).await;
    assert_eq!(status, 502);
    assert_eq!(body["code"], "DispatchFailure");
    assert!(h.registry.get("SL001").is_some());

    let (status, _) = h.get("/devices/SL001/status").await;
    assert_eq!(status, 502);
}

#[tokio::test]
async fn test_status_for_actuator_and_sensor() {
    let h = Harness::start().await;
    h.register_streetlight().await;
    h.post("/registry", r#"{"deviceId":"AIR001","kind":"SENSOR_AIR_QUALITY"}"#).await;

    let (status, body) = h.get("/devices/SL001/status").await;
    assert_eq!(status, 200);
    assert_eq!(body["deviceId"], "SL001");
    assert_eq!(body["status"]["intensity"], 100);

    // No telemetry yet
    let (status, body) = h.get("/devices/AIR001/status").await;
    assert_eq!(status, 200);
    assert!(body["status"].is_null());

    let mut fields = Map::new();
    fields.insert("pm25".into(), json!(9.5));
    h.telemetry.record(
        SensorChannel::AirQuality,
        TelemetryReading { sensor_id: "AIR001".into(), timestamp: Utc::now(), fields },
        Utc::now(),
    );
    let (_, body) = h.get("/devices/AIR001/status").await;
    assert_eq!(body["status"]["pm25"], 9.5);

    assert_eq!(h.get("/devices/GHOST/status").await.0, 404);
}

#[tokio::test]
async fn test_telemetry_discovery_and_operational_routes() {
    let h = Harness::start().await;
    h.register_streetlight().await;

    let (status, body) = h.get("/telemetry?limit=5").await;
    assert_eq!(status, 200);
    assert!(body["temperature"].as_array().unwrap().is_empty());
    assert!(body["airQuality"].as_array().unwrap().is_empty());

    // Nothing answers, so the round replaces the registry with nothing
    let (status, body) = h.post("/discovery", "").await;
    assert_eq!(status, 200);
    assert_eq!(body["devicesFound"], 0);
    assert!(h.registry.is_empty());

    let resp = h.http.get(format!("{}/health", h.base)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");

    let resp = h.http.get(format!("{}/metrics", h.base)).send().await.unwrap();
    let text = resp.text().await.unwrap();
    assert!(text.contains("city_discovery_rounds_total{gateway=\"gw-test\"} 1"));
    assert!(text.contains("city_registrations_total{gateway=\"gw-test\"} 1"));

    assert_eq!(h.get("/nope").await.0, 404);
}
