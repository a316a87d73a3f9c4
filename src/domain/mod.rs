//! Domain models - devices, commands and wire messages
//!
//! - `types` - device kinds, registry records and actuator value types
//! - `command` - typed commands parsed per device kind, and device replies
//! - `wire` - discovery, registration and telemetry payloads

pub mod command;
pub mod types;
pub mod wire;

pub use command::{Command, CommandReply, CommandRequest, Outcome};
pub use types::{DeviceKind, DeviceRecord, RecordSource, Resolution, SignalPhase, SignalTimings};
pub use wire::{DiscoveryRequest, DiscoveryResponse, RegistrationRequest, TelemetryReading};
