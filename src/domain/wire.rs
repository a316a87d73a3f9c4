//! JSON messages exchanged between the gateway and devices

use crate::domain::types::DeviceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DISCOVERY_REQUEST: &str = "DISCOVERY_REQUEST";
pub const DISCOVERY_RESPONSE: &str = "DISCOVERY_RESPONSE";

/// Multicast datagram sent by the gateway at the start of a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequest {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub requester_id: String,
    pub reply_port: u16,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_port: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

impl DiscoveryRequest {
    pub fn new(
        requester_id: impl Into<String>,
        reply_port: u16,
        correlation_id: impl Into<String>,
        registration_port: Option<u16>,
    ) -> Self {
        Self {
            msg_type: DISCOVERY_REQUEST.to_string(),
            requester_id: requester_id.into(),
            reply_port,
            correlation_id: correlation_id.into(),
            registration_port,
            timestamp: Utc::now(),
        }
    }
}

/// Unicast datagram a device sends back to the requester's reply port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub device_id: String,
    pub kind: DeviceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
}

impl DiscoveryResponse {
    pub fn new(
        device_id: impl Into<String>,
        kind: DeviceKind,
        address: Option<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            msg_type: DISCOVERY_RESPONSE.to_string(),
            device_id: device_id.into(),
            kind,
            address,
            capabilities: kind.capabilities(),
            correlation_id: correlation_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Peek at the `type` field of a datagram without committing to a schema
pub fn message_type(payload: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(rename = "type")]
        msg_type: String,
    }
    serde_json::from_slice::<Envelope>(payload).ok().map(|e| e.msg_type)
}

/// Body of `POST /registry`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub device_id: String,
    pub kind: DeviceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

/// A sensor reading as published on MQTT
///
/// Kind-specific fields are carried opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReading {
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}
