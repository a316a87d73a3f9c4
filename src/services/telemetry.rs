//! In-memory telemetry store fed by the MQTT ingestion loop

use crate::domain::types::DeviceKind;
use crate::domain::wire::TelemetryReading;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorChannel {
    Temperature,
    AirQuality,
}

impl SensorChannel {
    pub fn for_kind(kind: DeviceKind) -> Option<Self> {
        match kind {
            DeviceKind::SensorTemperature => Some(SensorChannel::Temperature),
            DeviceKind::SensorAirQuality => Some(SensorChannel::AirQuality),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorChannel::Temperature => "temperature",
            SensorChannel::AirQuality => "air_quality",
        }
    }
}

struct State {
    last_seen: FxHashMap<String, DateTime<Utc>>,
    temperature: VecDeque<TelemetryReading>,
    air_quality: VecDeque<TelemetryReading>,
}

impl State {
    fn history_mut(&mut self, channel: SensorChannel) -> &mut VecDeque<TelemetryReading> {
        match channel {
            SensorChannel::Temperature => &mut self.temperature,
            SensorChannel::AirQuality => &mut self.air_quality,
        }
    }

    fn history(&self, channel: SensorChannel) -> &VecDeque<TelemetryReading> {
        match channel {
            SensorChannel::Temperature => &self.temperature,
            SensorChannel::AirQuality => &self.air_quality,
        }
    }
}

/// Per-sensor last-seen times plus a bounded history per channel
pub struct TelemetryStore {
    capacity: usize,
    state: Mutex<State>,
}

impl TelemetryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(State {
                last_seen: FxHashMap::default(),
                temperature: VecDeque::with_capacity(capacity),
                air_quality: VecDeque::with_capacity(capacity),
            }),
        }
    }

    /// Record a reading received at `received_at` (gateway clock)
    pub fn record(&self, channel: SensorChannel, reading: TelemetryReading, received_at: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.last_seen.insert(reading.sensor_id.clone(), received_at);
        let capacity = self.capacity;
        let history = state.history_mut(channel);
        if history.len() == capacity {
            history.pop_front();
        }
        history.push_back(reading);
    }

    pub fn last_seen(&self, sensor_id: &str) -> Option<DateTime<Utc>> {
        self.state.lock().last_seen.get(sensor_id).copied()
    }

    /// Drop last-seen entries older than `cutoff`; returns how many went
    pub fn prune_last_seen(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        let before = state.last_seen.len();
        state.last_seen.retain(|_, seen| *seen >= cutoff);
        before - state.last_seen.len()
    }

    pub fn tracked_sensors(&self) -> usize {
        self.state.lock().last_seen.len()
    }

    /// Up to `limit` most recent readings, oldest first
    pub fn recent(&self, channel: SensorChannel, limit: usize) -> Vec<TelemetryReading> {
        let state = self.state.lock();
        let history = state.history(channel);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Most recent reading from one sensor
    pub fn latest_for(&self, channel: SensorChannel, sensor_id: &str) -> Option<TelemetryReading> {
        let state = self.state.lock();
        state.history(channel).iter().rev().find(|r| r.sensor_id == sensor_id).cloned()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
