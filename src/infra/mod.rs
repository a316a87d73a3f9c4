//! Infrastructure - configuration, metrics, logging and broker
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `broker` - Embedded MQTT broker (rumqttd)
//! - `logging` - tracing subscriber setup shared by every binary

pub mod broker;
pub mod config;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use metrics::Metrics;
