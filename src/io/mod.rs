//! IO modules - external system interfaces
//!
//! - `http` - response helpers shared by both HTTP servers
//! - `http_api` - gateway HTTP API
//! - `device_client` - reqwest transport to actuator command servers
//! - `probe` - TCP liveness probe used by the health monitor
//! - `mqtt` - MQTT client for receiving sensor telemetry
//! - `prometheus` - Prometheus text formatting for `/metrics`

pub mod device_client;
pub mod http;
pub mod http_api;
pub mod mqtt;
pub mod probe;
pub mod prometheus;

pub use device_client::HttpDeviceClient;
pub use http_api::ApiState;
pub use mqtt::TelemetryIngest;
pub use probe::TcpProbe;
