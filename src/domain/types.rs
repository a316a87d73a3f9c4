//! Shared types for the city gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device classification advertised in discovery and registration payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceKind {
    Camera,
    Streetlight,
    TrafficSignal,
    SensorTemperature,
    SensorAirQuality,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 5] = [
        DeviceKind::Camera,
        DeviceKind::Streetlight,
        DeviceKind::TrafficSignal,
        DeviceKind::SensorTemperature,
        DeviceKind::SensorAirQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Camera => "CAMERA",
            DeviceKind::Streetlight => "STREETLIGHT",
            DeviceKind::TrafficSignal => "TRAFFIC_SIGNAL",
            DeviceKind::SensorTemperature => "SENSOR_TEMPERATURE",
            DeviceKind::SensorAirQuality => "SENSOR_AIR_QUALITY",
        }
    }

    /// Sensors push telemetry; everything else is an actuator reached by command calls
    #[inline]
    pub fn is_sensor(&self) -> bool {
        matches!(self, DeviceKind::SensorTemperature | DeviceKind::SensorAirQuality)
    }

    #[inline]
    pub fn is_actuator(&self) -> bool {
        !self.is_sensor()
    }

    /// Capabilities a device of this kind advertises when answering discovery
    pub fn capabilities(&self) -> Vec<String> {
        let names: &[&str] = match self {
            DeviceKind::Camera => {
                &["PowerOn", "PowerOff", "SetResolution", "StartRecording", "StopRecording"]
            }
            DeviceKind::Streetlight => &["LampOn", "LampOff", "SetIntensity", "Deactivate"],
            DeviceKind::TrafficSignal => {
                &["PowerOn", "PowerOff", "SetTimings", "TriggerEmergency", "Deactivate"]
            }
            DeviceKind::SensorTemperature | DeviceKind::SensorAirQuality => &["publish_telemetry"],
        };
        names.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "CAMERA" => Ok(DeviceKind::Camera),
            "STREETLIGHT" => Ok(DeviceKind::Streetlight),
            "TRAFFIC_SIGNAL" | "SIGNAL" => Ok(DeviceKind::TrafficSignal),
            "SENSOR_TEMPERATURE" | "TEMPERATURE" => Ok(DeviceKind::SensorTemperature),
            "SENSOR_AIR_QUALITY" | "AIR_QUALITY" => Ok(DeviceKind::SensorAirQuality),
            other => Err(format!("unknown device kind: {other}")),
        }
    }
}

/// Which channel produced a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordSource {
    /// Multicast discovery response collected during a round
    Discovery,
    /// Reliable `POST /registry` call
    Registration,
}

/// One entry per known device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    pub kind: DeviceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub source: RecordSource,
    pub discovered_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Registry revision of the last write; assigned by the registry
    #[serde(skip)]
    pub revision: u64,
}

impl DeviceRecord {
    pub fn new(
        id: impl Into<String>,
        kind: DeviceKind,
        address: Option<String>,
        source: RecordSource,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            address,
            capabilities: kind.capabilities(),
            source,
            discovered_at: Utc::now(),
            last_seen: None,
            revision: 0,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        if !capabilities.is_empty() {
            self.capabilities = capabilities;
        }
        self
    }

    pub fn with_discovered_at(mut self, at: DateTime<Utc>) -> Self {
        self.discovered_at = at;
        self
    }
}

/// Camera capture resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "HD")]
    Hd,
    #[serde(rename = "FULL_HD")]
    FullHd,
    #[serde(rename = "4K")]
    Uhd4k,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Hd => "HD",
            Resolution::FullHd => "FULL_HD",
            Resolution::Uhd4k => "4K",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HD" | "720P" => Ok(Resolution::Hd),
            "FULL_HD" | "FULLHD" | "1080P" => Ok(Resolution::FullHd),
            "4K" | "UHD" => Ok(Resolution::Uhd4k),
            other => Err(format!("unsupported resolution: {other}")),
        }
    }
}

/// Traffic signal lamp phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalPhase {
    Red,
    Green,
    Yellow,
}

impl SignalPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalPhase::Red => "RED",
            SignalPhase::Green => "GREEN",
            SignalPhase::Yellow => "YELLOW",
        }
    }
}

impl fmt::Display for SignalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase durations in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalTimings {
    pub red: u64,
    pub green: u64,
    pub yellow: u64,
}

impl Default for SignalTimings {
    fn default() -> Self {
        Self { red: 30, green: 25, yellow: 5 }
    }
}

impl SignalTimings {
    pub fn duration_of(&self, phase: SignalPhase) -> std::time::Duration {
        let secs = match phase {
            SignalPhase::Red => self.red,
            SignalPhase::Green => self.green,
            SignalPhase::Yellow => self.yellow,
        };
        std::time::Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_wire_names() {
        assert_eq!(serde_json::to_string(&DeviceKind::TrafficSignal).unwrap(), "\"TRAFFIC_SIGNAL\"");
        let kind: DeviceKind = serde_json::from_str("\"SENSOR_AIR_QUALITY\"").unwrap();
        assert_eq!(kind, DeviceKind::SensorAirQuality);
        assert!(kind.is_sensor());
        assert!(DeviceKind::Camera.is_actuator());
    }

    #[test]
    fn test_device_kind_from_str_is_lenient() {
        assert_eq!("camera".parse::<DeviceKind>().unwrap(), DeviceKind::Camera);
        assert_eq!("traffic-signal".parse::<DeviceKind>().unwrap(), DeviceKind::TrafficSignal);
        assert_eq!("temperature".parse::<DeviceKind>().unwrap(), DeviceKind::SensorTemperature);
        assert!("toaster".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn test_resolution_aliases() {
        assert_eq!("FullHD".parse::<Resolution>().unwrap(), Resolution::FullHd);
        assert_eq!("1080p".parse::<Resolution>().unwrap(), Resolution::FullHd);
        assert_eq!("4k".parse::<Resolution>().unwrap(), Resolution::Uhd4k);
        assert!("8K".parse::<Resolution>().is_err());
        assert_eq!(serde_json::to_string(&Resolution::Uhd4k).unwrap(), "\"4K\"");
    }

    #[test]
    fn test_record_serializes_camel_case_without_revision() {
        let mut record =
            DeviceRecord::new("CAM001", DeviceKind::Camera, Some("127.0.0.1:50052".into()), RecordSource::Discovery);
        record.revision = 42;
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "CAM001");
        assert_eq!(json["kind"], "CAMERA");
        assert!(json.get("discoveredAt").is_some());
        assert!(json.get("revision").is_none());
    }
}
