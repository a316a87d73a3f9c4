//! Health monitor - probes actuators, checks sensor recency, evicts the dead
//!
//! A pass evaluates a registry snapshot: actuators get a concurrent liveness
//! probe each, sensors are judged by when their last telemetry arrived.
//! Failing entries are removed in a single `evict` call at the end, which
//! skips anything rewritten while the pass was running.

use crate::error::ProbeError;
use crate::infra::metrics::Metrics;
use crate::services::registry::{DeviceRegistry, EvictionCandidate};
use crate::services::telemetry::TelemetryStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Liveness check against an actuator's command address
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, address: &str) -> Result<(), ProbeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorVerdict {
    /// Telemetry arrived within the staleness threshold
    Fresh(DateTime<Utc>),
    /// Nothing received yet; left alone
    NoTelemetry,
    Stale,
}

pub fn sensor_verdict(
    last_seen: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    staleness: Duration,
) -> SensorVerdict {
    let Some(seen) = last_seen else {
        return SensorVerdict::NoTelemetry;
    };
    let age = now.signed_duration_since(seen);
    match chrono::Duration::from_std(staleness) {
        Ok(limit) if age > limit => SensorVerdict::Stale,
        _ => SensorVerdict::Fresh(seen),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub checked: usize,
    pub healthy: usize,
    pub evicted: Vec<String>,
}

pub struct HealthMonitor {
    registry: Arc<DeviceRegistry>,
    telemetry: Arc<TelemetryStore>,
    probe: Arc<dyn LivenessProbe>,
    metrics: Arc<Metrics>,
    interval: Duration,
    staleness: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        telemetry: Arc<TelemetryStore>,
        probe: Arc<dyn LivenessProbe>,
        metrics: Arc<Metrics>,
        interval: Duration,
        staleness: Duration,
    ) -> Self {
        Self { registry, telemetry, probe, metrics, interval, staleness }
    }

    /// One pass over the registry
    pub async fn check_once(&self) -> HealthReport {
        let snapshot = self.registry.snapshot();
        let now = Utc::now();
        let checked = snapshot.len();
        let mut candidates: Vec<EvictionCandidate> = Vec::new();
        let mut probes = JoinSet::new();

        for record in snapshot {
            if record.kind.is_sensor() {
                match sensor_verdict(self.telemetry.last_seen(&record.id), now, self.staleness) {
                    SensorVerdict::Fresh(seen) => {
                        self.registry.touch(&record.id, seen);
                    }
                    SensorVerdict::NoTelemetry => {
                        debug!(device_id = %record.id, "sensor_no_telemetry_yet");
                    }
                    SensorVerdict::Stale => {
                        warn!(device_id = %record.id, "sensor_telemetry_stale");
                        candidates.push(EvictionCandidate::from(&record));
                    }
                }
                continue;
            }

            let Some(address) = record.address.clone() else {
                warn!(device_id = %record.id, "actuator_without_address");
                candidates.push(EvictionCandidate::from(&record));
                continue;
            };

            let probe = self.probe.clone();
            probes.spawn(async move {
                let result = probe.probe(&address).await;
                (EvictionCandidate::from(&record), result)
            });
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((candidate, Ok(()))) => {
                    self.registry.touch(&candidate.id, Utc::now());
                }
                Ok((candidate, Err(e))) => {
                    warn!(device_id = %candidate.id, error = %e, "probe_failed");
                    candidates.push(candidate);
                }
                Err(e) => {
                    error!(error = %e, "probe_task_failed");
                }
            }
        }

        let evicted = self.registry.evict(&candidates);
        for id in &evicted {
            info!(device_id = %id, "device_evicted");
        }
        self.metrics.record_health_check(evicted.len());

        // Stale sensors were judged above; anything older is never consulted again
        if let Ok(limit) = chrono::Duration::from_std(self.staleness) {
            let pruned = self.telemetry.prune_last_seen(now - limit);
            if pruned > 0 {
                debug!(pruned = %pruned, "sensor_last_seen_pruned");
            }
        }

        HealthReport { checked, healthy: checked - candidates.len(), evicted }
    }

    /// Periodic health loop; the first pass runs one interval after start
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.check_once().await;
                    info!(
                        checked = %report.checked,
                        healthy = %report.healthy,
                        evicted = %report.evicted.len(),
                        "health_check_completed"
                    );
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("health_monitor_shutdown");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{DeviceKind, DeviceRecord, RecordSource};
    use crate::domain::wire::TelemetryReading;
    use crate::services::telemetry::SensorChannel;
    use parking_lot::Mutex;
    use rustc_hash::FxHashSet;

    /// Fails for a configurable set of addresses
    #[derive(Default)]
    struct ScriptedProbe {
        failing: Mutex<FxHashSet<String>>,
    }

    #[async_trait]
    impl LivenessProbe for ScriptedProbe {
        async fn probe(&self, address: &str) -> Result<(), ProbeError> {
            if self.failing.lock().contains(address) {
                Err(ProbeError::Timeout(5000))
            } else {
                Ok(())
            }
        }
    }

    /// Re-registers the device mid-probe, then reports failure
    struct ReRegisteringProbe {
        registry: Arc<DeviceRegistry>,
    }

    #[async_trait]
    impl LivenessProbe for ReRegisteringProbe {
        async fn probe(&self, _address: &str) -> Result<(), ProbeError> {
            self.registry.upsert(actuator("CAM001", 1));
            Err(ProbeError::Timeout(5000))
        }
    }

    fn actuator(id: &str, port: u16) -> DeviceRecord {
        DeviceRecord::new(id, DeviceKind::Camera, Some(format!("127.0.0.1:{port}")), RecordSource::Discovery)
    }

    fn sensor(id: &str) -> DeviceRecord {
        DeviceRecord::new(id, DeviceKind::SensorTemperature, None, RecordSource::Discovery)
    }

    fn reading(id: &str) -> TelemetryReading {
        TelemetryReading { sensor_id: id.to_string(), timestamp: Utc::now(), fields: Default::default() }
    }

    fn monitor(
        registry: Arc<DeviceRegistry>,
        telemetry: Arc<TelemetryStore>,
        probe: Arc<dyn LivenessProbe>,
    ) -> HealthMonitor {
        HealthMonitor::new(
            registry,
            telemetry,
            probe,
            Arc::new(Metrics::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_sensor_verdict() {
        let now = Utc::now();
        let staleness = Duration::from_secs(60);
        assert_eq!(sensor_verdict(None, now, staleness), SensorVerdict::NoTelemetry);

        let fresh = now - chrono::Duration::seconds(10);
        assert_eq!(sensor_verdict(Some(fresh), now, staleness), SensorVerdict::Fresh(fresh));

        let stale = now - chrono::Duration::seconds(61);
        assert_eq!(sensor_verdict(Some(stale), now, staleness), SensorVerdict::Stale);
    }

    #[tokio::test]
    async fn test_sensor_staleness_rules() {
        let registry = Arc::new(DeviceRegistry::new());
        let telemetry = Arc::new(TelemetryStore::default());
        registry.upsert(sensor("TEMP_FRESH"));
        registry.upsert(sensor("TEMP_STALE"));
        registry.upsert(sensor("TEMP_SILENT"));

        telemetry.record(SensorChannel::Temperature, reading("TEMP_FRESH"), Utc::now());
        telemetry.record(
            SensorChannel::Temperature,
            reading("TEMP_STALE"),
            Utc::now() - chrono::Duration::seconds(120),
        );

        // Published on the topic but never registered
        telemetry.record(
            SensorChannel::Temperature,
            reading("TEMP_UNKNOWN"),
            Utc::now() - chrono::Duration::seconds(300),
        );

        let report = monitor(registry.clone(), telemetry.clone(), Arc::new(ScriptedProbe::default()))
            .check_once()
            .await;

        assert_eq!(report.checked, 3);
        assert_eq!(report.evicted, vec!["TEMP_STALE".to_string()]);
        assert!(registry.get("TEMP_FRESH").unwrap().last_seen.is_some());
        assert!(registry.get("TEMP_SILENT").unwrap().last_seen.is_none());

        assert_eq!(telemetry.last_seen("TEMP_STALE"), None);
        assert_eq!(telemetry.last_seen("TEMP_UNKNOWN"), None);
        assert!(telemetry.last_seen("TEMP_FRESH").is_some());
        assert_eq!(telemetry.tracked_sensors(), 1);
    }

    #[tokio::test]
    async fn test_failed_probe_evicts_actuator() {
        let registry = Arc::new(DeviceRegistry::new());
        registry.upsert(actuator("CAM001", 1));
        registry.upsert(actuator("CAM002", 2));
        let mut orphan = actuator("SIG001", 3);
        orphan.address = None;
        registry.upsert(orphan);

        let probe = Arc::new(ScriptedProbe::default());
        probe.failing.lock().insert("127.0.0.1:2".to_string());

        let report = monitor(registry.clone(), Arc::new(TelemetryStore::default()), probe)
            .check_once()
            .await;

        assert_eq!(report.healthy, 1);
        let mut evicted = report.evicted.clone();
        evicted.sort();
        assert_eq!(evicted, vec!["CAM002".to_string(), "SIG001".to_string()]);
        assert!(registry.get("CAM001").unwrap().last_seen.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_during_evaluation_prevents_eviction() {
        let registry = Arc::new(DeviceRegistry::new());
        registry.upsert(actuator("CAM001", 1));

        let probe = Arc::new(ReRegisteringProbe { registry: registry.clone() });
        let report = monitor(registry.clone(), Arc::new(TelemetryStore::default()), probe)
            .check_once()
            .await;

        assert!(report.evicted.is_empty());
        assert!(registry.get("CAM001").is_some());
    }
}
