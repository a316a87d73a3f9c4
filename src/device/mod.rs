//! Device runtime - what runs inside a camera, streetlight, signal or sensor
//!
//! - `camera`, `streetlight`, `signal` - actuator state machines
//! - `server` - per-actuator HTTP command server
//! - `responder` - multicast discovery responder and best-effort registration
//! - `sensor` - telemetry publisher

pub mod camera;
pub mod responder;
pub mod sensor;
pub mod server;
pub mod signal;
pub mod streetlight;

use crate::domain::command::{Command, CommandReply};
use crate::domain::types::DeviceKind;
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;

pub use camera::{Camera, CameraState};
pub use responder::{DeviceIdentity, DiscoveryResponder};
pub use server::DeviceServer;
pub use signal::{SignalState, TrafficSignal};
pub use streetlight::{Streetlight, StreetlightState};

/// One actuator of any kind behind a uniform command surface
#[derive(Debug)]
pub enum Actuator {
    Camera(Mutex<Camera>),
    Streetlight(Mutex<Streetlight>),
    Signal(TrafficSignal),
}

impl Actuator {
    /// Build the state machine for `kind`; sensors have none
    pub fn for_kind(kind: DeviceKind, signal_poll: Duration) -> Option<Self> {
        match kind {
            DeviceKind::Camera => Some(Actuator::Camera(Mutex::new(Camera::new()))),
            DeviceKind::Streetlight => Some(Actuator::Streetlight(Mutex::new(Streetlight::new()))),
            DeviceKind::TrafficSignal => Some(Actuator::Signal(TrafficSignal::new(signal_poll))),
            DeviceKind::SensorTemperature | DeviceKind::SensorAirQuality => None,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            Actuator::Camera(_) => DeviceKind::Camera,
            Actuator::Streetlight(_) => DeviceKind::Streetlight,
            Actuator::Signal(_) => DeviceKind::TrafficSignal,
        }
    }

    pub fn apply(&self, command: &Command) -> CommandReply {
        match self {
            Actuator::Camera(camera) => camera.lock().apply(command),
            Actuator::Streetlight(light) => light.lock().apply(command),
            Actuator::Signal(signal) => signal.apply(command),
        }
    }

    /// Kind-specific state as JSON
    pub fn status(&self) -> Value {
        let value = match self {
            Actuator::Camera(camera) => serde_json::to_value(camera.lock().state()),
            Actuator::Streetlight(light) => serde_json::to_value(light.lock().state()),
            Actuator::Signal(signal) => serde_json::to_value(signal.state()),
        };
        value.unwrap_or(Value::Null)
    }

    /// False once the device has been deactivated
    pub fn is_active(&self) -> bool {
        match self {
            Actuator::Camera(_) => true,
            Actuator::Streetlight(light) => light.lock().is_active(),
            Actuator::Signal(signal) => signal.is_active(),
        }
    }

    pub fn reactivate(&self) {
        match self {
            Actuator::Camera(_) => {}
            Actuator::Streetlight(light) => light.lock().reactivate(),
            Actuator::Signal(signal) => signal.reactivate(),
        }
    }

    /// Boot behaviour: signals start cycling, other kinds idle
    pub fn start(&self) {
        if let Actuator::Signal(signal) = self {
            signal.apply(&Command::PowerOn);
        }
    }
}
