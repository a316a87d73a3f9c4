//! Typed device commands and the reply envelope returned by devices
//!
//! Commands travel as `{command, params}` JSON. Parsing checks both that the
//! name is legal for the target device kind and that the parameters are
//! present and in range, so devices only ever see well-formed commands.

use crate::domain::types::{DeviceKind, Resolution, SignalTimings};
use crate::error::CommandError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Longest accepted signal phase, in seconds
pub const MAX_PHASE_SECS: u64 = 3600;

/// A command understood by at least one actuator kind
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PowerOn,
    PowerOff,
    SetResolution(Resolution),
    StartRecording,
    StopRecording,
    LampOn,
    LampOff,
    SetIntensity(u8),
    SetTimings(SignalTimings),
    TriggerEmergency,
    Deactivate,
}

/// Command names accepted per actuator kind; sensors accept none
pub fn allowed_for(kind: DeviceKind) -> &'static [&'static str] {
    match kind {
        DeviceKind::Camera => {
            &["PowerOn", "PowerOff", "SetResolution", "StartRecording", "StopRecording"]
        }
        DeviceKind::Streetlight => &["LampOn", "LampOff", "SetIntensity", "Deactivate"],
        DeviceKind::TrafficSignal => {
            &["PowerOn", "PowerOff", "SetTimings", "TriggerEmergency", "Deactivate"]
        }
        DeviceKind::SensorTemperature | DeviceKind::SensorAirQuality => &[],
    }
}

impl Command {
    /// Parse a command for a device of `kind`
    pub fn parse(kind: DeviceKind, name: &str, params: &Value) -> Result<Self, CommandError> {
        if !allowed_for(kind).contains(&name) {
            return Err(CommandError::Unsupported {
                command: name.to_string(),
                kind: kind.to_string(),
            });
        }

        let command = match name {
            "PowerOn" => Command::PowerOn,
            "PowerOff" => Command::PowerOff,
            "StartRecording" => Command::StartRecording,
            "StopRecording" => Command::StopRecording,
            "LampOn" => Command::LampOn,
            "LampOff" => Command::LampOff,
            "TriggerEmergency" => Command::TriggerEmergency,
            "Deactivate" => Command::Deactivate,
            "SetResolution" => {
                let raw = str_param(params, "resolution")?;
                let resolution = raw.parse::<Resolution>().map_err(CommandError::InvalidParams)?;
                Command::SetResolution(resolution)
            }
            "SetIntensity" => {
                let intensity = u64_param(params, "intensity")?;
                if intensity > 100 {
                    return Err(CommandError::InvalidParams(format!(
                        "intensity must be within 0..=100, got {intensity}"
                    )));
                }
                Command::SetIntensity(intensity as u8)
            }
            "SetTimings" => {
                let timings = SignalTimings {
                    red: u64_param(params, "red")?,
                    green: u64_param(params, "green")?,
                    yellow: u64_param(params, "yellow")?,
                };
                let in_range = |secs: u64| (1..=MAX_PHASE_SECS).contains(&secs);
                if !(in_range(timings.red) && in_range(timings.green) && in_range(timings.yellow)) {
                    return Err(CommandError::InvalidParams(format!(
                        "phase durations must be within 1..={MAX_PHASE_SECS} seconds"
                    )));
                }
                Command::SetTimings(timings)
            }
            other => {
                return Err(CommandError::Unsupported {
                    command: other.to_string(),
                    kind: kind.to_string(),
                })
            }
        };

        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::PowerOn => "PowerOn",
            Command::PowerOff => "PowerOff",
            Command::SetResolution(_) => "SetResolution",
            Command::StartRecording => "StartRecording",
            Command::StopRecording => "StopRecording",
            Command::LampOn => "LampOn",
            Command::LampOff => "LampOff",
            Command::SetIntensity(_) => "SetIntensity",
            Command::SetTimings(_) => "SetTimings",
            Command::TriggerEmergency => "TriggerEmergency",
            Command::Deactivate => "Deactivate",
        }
    }

    /// Wire parameters for this command, `Value::Null` when it takes none
    pub fn params(&self) -> Value {
        match self {
            Command::SetResolution(r) => json!({ "resolution": r.as_str() }),
            Command::SetIntensity(i) => json!({ "intensity": i }),
            Command::SetTimings(t) => json!({ "red": t.red, "green": t.green, "yellow": t.yellow }),
            _ => Value::Null,
        }
    }

    pub fn to_request(&self) -> CommandRequest {
        CommandRequest { command: self.name().to_string(), params: self.params() }
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, CommandError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::InvalidParams(format!("missing string parameter '{key}'")))
}

fn u64_param(params: &Value, key: &str) -> Result<u64, CommandError> {
    match params.get(key) {
        Some(v) => v.as_u64().ok_or_else(|| {
            CommandError::InvalidParams(format!("parameter '{key}' must be a non-negative integer"))
        }),
        None => Err(CommandError::InvalidParams(format!("missing parameter '{key}'"))),
    }
}

/// `{command, params}` body sent to `POST /command`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Applied,
    Rejected,
}

/// What a device answers after evaluating a command against its guards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub outcome: Outcome,
    pub message: String,
}

impl CommandReply {
    pub fn applied(message: impl Into<String>) -> Self {
        Self { outcome: Outcome::Applied, message: message.into() }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { outcome: Outcome::Rejected, message: message.into() }
    }

    pub fn is_applied(&self) -> bool {
        self.outcome == Outcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse(DeviceKind::Camera, "PowerOn", &Value::Null), Ok(Command::PowerOn));
        assert_eq!(
            Command::parse(DeviceKind::TrafficSignal, "TriggerEmergency", &Value::Null),
            Ok(Command::TriggerEmergency)
        );
    }

    #[test]
    fn test_command_illegal_for_kind() {
        let err = Command::parse(
            DeviceKind::Streetlight,
            "SetResolution",
            &json!({"resolution": "HD"}),
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::Unsupported { .. }));

        let err = Command::parse(DeviceKind::SensorTemperature, "PowerOn", &Value::Null).unwrap_err();
        assert!(matches!(err, CommandError::Unsupported { .. }));

        let err = Command::parse(DeviceKind::Camera, "SelfDestruct", &Value::Null).unwrap_err();
        assert!(matches!(err, CommandError::Unsupported { .. }));
    }

    #[test]
    fn test_set_resolution_params() {
        assert_eq!(
            Command::parse(DeviceKind::Camera, "SetResolution", &json!({"resolution": "1080p"})),
            Ok(Command::SetResolution(Resolution::FullHd))
        );
        assert!(matches!(
            Command::parse(DeviceKind::Camera, "SetResolution", &json!({})),
            Err(CommandError::InvalidParams(_))
        ));
        assert!(matches!(
            Command::parse(DeviceKind::Camera, "SetResolution", &json!({"resolution": "8K"})),
            Err(CommandError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_set_intensity_range() {
        assert_eq!(
            Command::parse(DeviceKind::Streetlight, "SetIntensity", &json!({"intensity": 0})),
            Ok(Command::SetIntensity(0))
        );
        assert!(matches!(
            Command::parse(DeviceKind::Streetlight, "SetIntensity", &json!({"intensity": 101})),
            Err(CommandError::InvalidParams(_))
        ));
        assert!(matches!(
            Command::parse(DeviceKind::Streetlight, "SetIntensity", &json!({"intensity": -5})),
            Err(CommandError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_set_timings_requires_all_phases() {
        let ok = Command::parse(
            DeviceKind::TrafficSignal,
            "SetTimings",
            &json!({"red": 10, "green": 8, "yellow": 2}),
        );
        assert_eq!(ok, Ok(Command::SetTimings(SignalTimings { red: 10, green: 8, yellow: 2 })));

        assert!(matches!(
            Command::parse(DeviceKind::TrafficSignal, "SetTimings", &json!({"red": 10, "green": 8})),
            Err(CommandError::InvalidParams(_))
        ));
        assert!(matches!(
            Command::parse(
                DeviceKind::TrafficSignal,
                "SetTimings",
                &json!({"red": 0, "green": 8, "yellow": 2})
            ),
            Err(CommandError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_set_timings_rejects_oversized_phase() {
        let at_cap = json!({"red": MAX_PHASE_SECS, "green": 1, "yellow": 1});
        assert!(Command::parse(DeviceKind::TrafficSignal, "SetTimings", &at_cap).is_ok());

        for params in [
            json!({"red": MAX_PHASE_SECS + 1, "green": 8, "yellow": 2}),
            json!({"red": 10, "green": u64::MAX, "yellow": 2}),
            json!({"red": 10, "green": 8, "yellow": u64::MAX}),
        ] {
            assert!(matches!(
                Command::parse(DeviceKind::TrafficSignal, "SetTimings", &params),
                Err(CommandError::InvalidParams(_))
            ));
        }
    }

    #[test]
    fn test_request_reparses_to_same_command() {
        let cmd = Command::SetTimings(SignalTimings { red: 12, green: 9, yellow: 3 });
        let req = cmd.to_request();
        assert_eq!(Command::parse(DeviceKind::TrafficSignal, &req.command, &req.params), Ok(cmd));

        let req = Command::PowerOff.to_request();
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"command":"PowerOff"}"#);
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = CommandReply::rejected("camera is off");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["outcome"], "rejected");
        assert_eq!(json["message"], "camera is off");
    }
}
