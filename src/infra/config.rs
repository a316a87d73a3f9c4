//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and field is optional; anything missing takes its default.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Requester id advertised in discovery requests
    pub id: String,
    pub http_bind_address: String,
    pub http_port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            id: "city-gateway".to_string(),
            http_bind_address: "0.0.0.0".to_string(),
            http_port: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub multicast_group: Ipv4Addr,
    pub port: u16,
    /// Response collection window per round
    pub window_ms: u64,
    /// Period between automatic rounds
    pub interval_secs: u64,
    pub ttl: u32,
    /// Advertise the HTTP port so devices also register over the reliable channel
    pub registration_enabled: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_group: Ipv4Addr::new(224, 0, 0, 1),
            port: 10000,
            window_ms: 5000,
            interval_secs: 120,
            ttl: 2,
            registration_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: u64,
    pub probe_timeout_ms: u64,
    pub sensor_staleness_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { interval_secs: 60, probe_timeout_ms: 5000, sensor_staleness_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { timeout_ms: 3000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub temperature_topic: String,
    pub air_quality_topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            temperature_topic: "city/sensors/temperature".to_string(),
            air_quality_topic: "city/sensors/air_quality".to_string(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub history_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { history_capacity: 100 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { enabled: true, bind_address: "0.0.0.0".to_string(), port: 1883 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub gateway: GatewayConfig,
    pub discovery: DiscoveryConfig,
    pub health: HealthConfig,
    pub dispatch: DispatchConfig,
    pub mqtt: MqttConfig,
    pub telemetry: TelemetryConfig,
    pub broker: BrokerConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    gateway_id: String,
    http_bind_address: String,
    http_port: u16,
    multicast_group: Ipv4Addr,
    discovery_port: u16,
    discovery_window_ms: u64,
    discovery_interval_secs: u64,
    discovery_ttl: u32,
    registration_enabled: bool,
    health_interval_secs: u64,
    probe_timeout_ms: u64,
    sensor_staleness_secs: u64,
    dispatch_timeout_ms: u64,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_temperature_topic: String,
    mqtt_air_quality_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    history_capacity: usize,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            gateway_id: toml_config.gateway.id,
            http_bind_address: toml_config.gateway.http_bind_address,
            http_port: toml_config.gateway.http_port,
            multicast_group: toml_config.discovery.multicast_group,
            discovery_port: toml_config.discovery.port,
            discovery_window_ms: toml_config.discovery.window_ms,
            discovery_interval_secs: toml_config.discovery.interval_secs,
            discovery_ttl: toml_config.discovery.ttl,
            registration_enabled: toml_config.discovery.registration_enabled,
            health_interval_secs: toml_config.health.interval_secs,
            probe_timeout_ms: toml_config.health.probe_timeout_ms,
            sensor_staleness_secs: toml_config.health.sensor_staleness_secs,
            dispatch_timeout_ms: toml_config.dispatch.timeout_ms,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_temperature_topic: toml_config.mqtt.temperature_topic,
            mqtt_air_quality_topic: toml_config.mqtt.air_quality_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            history_capacity: toml_config.telemetry.history_capacity,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from `path`, falling back to defaults on any error
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(Self::resolve_config_path(args))
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn multicast_group(&self) -> Ipv4Addr {
        self.multicast_group
    }

    pub fn discovery_port(&self) -> u16 {
        self.discovery_port
    }

    /// Multicast destination for discovery requests
    pub fn discovery_target(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.multicast_group, self.discovery_port))
    }

    pub fn discovery_window(&self) -> Duration {
        Duration::from_millis(self.discovery_window_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn discovery_ttl(&self) -> u32 {
        self.discovery_ttl
    }

    pub fn registration_enabled(&self) -> bool {
        self.registration_enabled
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn sensor_staleness(&self) -> Duration {
        Duration::from_secs(self.sensor_staleness_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_temperature_topic(&self) -> &str {
        &self.mqtt_temperature_topic
    }

    pub fn mqtt_air_quality_topic(&self) -> &str {
        &self.mqtt_air_quality_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shorten the discovery window
    pub fn with_discovery_window_ms(mut self, ms: u64) -> Self {
        self.discovery_window_ms = ms;
        self
    }
}
