//! Command dispatcher - route a named command to a registered device
//!
//! Lookup, parse for the device's kind, then invoke the remote call under a
//! bounded timeout. Failures come back as [`DispatchError`]; the registry is
//! never touched, so a device that fails a command stays registered until
//! the health monitor decides otherwise.

use crate::domain::command::{Command, CommandReply, CommandRequest};
use crate::domain::types::DeviceRecord;
use crate::error::{DispatchError, TransportError};
use crate::infra::metrics::Metrics;
use crate::services::registry::DeviceRegistry;
use crate::services::telemetry::{SensorChannel, TelemetryStore};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Remote command channel to an actuator
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn send_command(
        &self,
        address: &str,
        request: &CommandRequest,
    ) -> Result<CommandReply, TransportError>;

    async fn fetch_status(&self, address: &str) -> Result<Value, TransportError>;
}

pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
    telemetry: Arc<TelemetryStore>,
    transport: Arc<dyn DeviceTransport>,
    metrics: Arc<Metrics>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        telemetry: Arc<TelemetryStore>,
        transport: Arc<dyn DeviceTransport>,
        metrics: Arc<Metrics>,
        timeout: Duration,
    ) -> Self {
        Self { registry, telemetry, transport, metrics, timeout }
    }

    fn lookup(&self, device_id: &str) -> Result<DeviceRecord, DispatchError> {
        self.registry
            .get(device_id)
            .ok_or_else(|| DispatchError::DeviceNotFound(device_id.to_string()))
    }

    pub async fn dispatch(
        &self,
        device_id: &str,
        command_name: &str,
        params: &Value,
    ) -> Result<CommandReply, DispatchError> {
        let record = self.lookup(device_id)?;

        let command = Command::parse(record.kind, command_name, params).map_err(|e| {
            self.metrics.record_dispatch_rejected();
            warn!(device_id = %device_id, command = %command_name, error = %e, "command_refused");
            DispatchError::from(e)
        })?;

        let address = record.address.as_deref().ok_or_else(|| {
            self.metrics.record_dispatch_failure();
            DispatchError::DispatchFailure(TransportError::NoAddress)
        })?;

        let started = Instant::now();
        let request = command.to_request();
        let result = tokio::time::timeout(self.timeout, self.transport.send_command(address, &request))
            .await
            .unwrap_or_else(|_| Err(TransportError::Timeout(self.timeout.as_millis() as u64)));

        match result {
            Ok(reply) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.metrics.record_dispatch(latency_ms);
                info!(
                    device_id = %device_id,
                    command = %command.name(),
                    outcome = ?reply.outcome,
                    latency_ms = %latency_ms,
                    "command_dispatched"
                );
                Ok(reply)
            }
            Err(e) => {
                self.metrics.record_dispatch_failure();
                warn!(device_id = %device_id, command = %command.name(), error = %e, "dispatch_failed");
                Err(DispatchError::DispatchFailure(e))
            }
        }
    }

    /// Current state of a device
    ///
    /// Actuators are asked directly; sensors answer with their latest reading,
    /// or `null` when nothing has arrived yet.
    pub async fn status(&self, device_id: &str) -> Result<(DeviceRecord, Value), DispatchError> {
        let record = self.lookup(device_id)?;

        if let Some(channel) = SensorChannel::for_kind(record.kind) {
            let latest = self
                .telemetry
                .latest_for(channel, device_id)
                .and_then(|r| serde_json::to_value(r).ok())
                .unwrap_or(Value::Null);
            return Ok((record, latest));
        }

        let address = record
            .address
            .as_deref()
            .ok_or(DispatchError::DispatchFailure(TransportError::NoAddress))?;

        let status = tokio::time::timeout(self.timeout, self.transport.fetch_status(address))
            .await
            .unwrap_or_else(|_| Err(TransportError::Timeout(self.timeout.as_millis() as u64)))
            .map_err(|e| {
                warn!(device_id = %device_id, error = %e, "status_failed");
                DispatchError::DispatchFailure(e)
            })?;

        Ok((record, status))
    }
}
