//! Services - gateway logic and state management
//!
//! - `registry` - authoritative device map with revision tracking
//! - `discovery` - multicast discovery rounds
//! - `health` - liveness probing and eviction
//! - `dispatcher` - command routing to actuators
//! - `telemetry` - sensor last-seen times and bounded reading history

pub mod discovery;
pub mod dispatcher;
pub mod health;
pub mod registry;
pub mod telemetry;

pub use discovery::{DiscoveryEngine, DiscoverySettings};
pub use dispatcher::{DeviceTransport, Dispatcher};
pub use health::{HealthMonitor, HealthReport, LivenessProbe};
pub use registry::DeviceRegistry;
pub use telemetry::{SensorChannel, TelemetryStore};
