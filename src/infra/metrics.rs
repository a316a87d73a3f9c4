//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for every update so the HTTP handlers, the discovery and
//! health loops and the MQTT ingestion task never contend on a mutex.
//! Reporting swaps the periodic counters to zero; monotonic totals are only
//! ever read.
//!
//! NOTE: All atomics use Relaxed ordering intentionally: these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Dispatch latency bucket boundaries (milliseconds)
/// Buckets: ≤5, ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, >2560
const BUCKET_BOUNDS: [u64; 10] = [5, 10, 20, 40, 80, 160, 320, 640, 1280, 2560];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [5, 10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Discovery rounds completed (monotonic)
    discovery_rounds: AtomicU64,
    /// Discovery rounds that failed on a socket error (monotonic)
    discovery_failures: AtomicU64,
    /// Devices found by the most recent round (gauge)
    last_round_devices: AtomicU64,
    /// Successful `POST /registry` calls (monotonic)
    registrations: AtomicU64,
    /// Health passes completed (monotonic)
    health_checks: AtomicU64,
    /// Devices evicted by the health monitor (monotonic)
    evictions: AtomicU64,
    /// Commands accepted by a device (monotonic)
    commands_dispatched: AtomicU64,
    /// Commands that failed in transport (monotonic)
    dispatch_failures: AtomicU64,
    /// Commands refused before leaving the gateway (monotonic)
    dispatch_rejected: AtomicU64,
    /// Dispatch latency histogram (reset on report)
    dispatch_latency_buckets: [AtomicU64; NUM_BUCKETS],
    dispatch_latency_sum_ms: AtomicU64,
    dispatch_latency_max_ms: AtomicU64,
    dispatch_since_report: AtomicU64,
    /// Telemetry messages recorded (monotonic)
    telemetry_received: AtomicU64,
    /// Telemetry messages that failed to parse (monotonic)
    telemetry_rejected: AtomicU64,
    /// Registry size at last sample (gauge)
    registered_devices: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            discovery_rounds: AtomicU64::new(0),
            discovery_failures: AtomicU64::new(0),
            last_round_devices: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            health_checks: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            commands_dispatched: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            dispatch_rejected: AtomicU64::new(0),
            dispatch_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            dispatch_latency_sum_ms: AtomicU64::new(0),
            dispatch_latency_max_ms: AtomicU64::new(0),
            dispatch_since_report: AtomicU64::new(0),
            telemetry_received: AtomicU64::new(0),
            telemetry_rejected: AtomicU64::new(0),
            registered_devices: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_discovery_round(&self, devices_found: usize) {
        self.discovery_rounds.fetch_add(1, Ordering::Relaxed);
        self.last_round_devices.store(devices_found as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_discovery_failure(&self) {
        self.discovery_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_health_check(&self, evicted: usize) {
        self.health_checks.fetch_add(1, Ordering::Relaxed);
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    /// Record a command that reached the device and came back (lock-free)
    #[inline]
    pub fn record_dispatch(&self, latency_ms: u64) {
        self.commands_dispatched.fetch_add(1, Ordering::Relaxed);
        self.dispatch_since_report.fetch_add(1, Ordering::Relaxed);
        self.dispatch_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);

        let bucket = bucket_index(latency_ms);
        self.dispatch_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.dispatch_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dispatch_rejected(&self) {
        self.dispatch_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_telemetry_received(&self) {
        self.telemetry_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_telemetry_rejected(&self) {
        self.telemetry_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_registered_devices(&self, count: usize) {
        self.registered_devices.store(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn discovery_rounds(&self) -> u64 {
        self.discovery_rounds.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dispatch_failures(&self) -> u64 {
        self.dispatch_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn telemetry_received(&self) -> u64 {
        self.telemetry_received.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn telemetry_rejected(&self) -> u64 {
        self.telemetry_rejected.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let dispatch_count = self.dispatch_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.dispatch_latency_sum_ms.swap(0, Ordering::Relaxed);
        let latency_max = self.dispatch_latency_max_ms.swap(0, Ordering::Relaxed);
        let dispatch_lat_buckets = swap_buckets(&self.dispatch_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let commands_per_min = if elapsed.as_secs_f64() > 0.0 {
            dispatch_count as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            discovery_rounds: self.discovery_rounds.load(Ordering::Relaxed),
            discovery_failures: self.discovery_failures.load(Ordering::Relaxed),
            last_round_devices: self.last_round_devices.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            health_checks: self.health_checks.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            commands_dispatched: self.commands_dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            dispatch_rejected: self.dispatch_rejected.load(Ordering::Relaxed),
            commands_per_min,
            dispatch_lat_buckets,
            dispatch_lat_avg_ms: if dispatch_count > 0 { latency_sum / dispatch_count } else { 0 },
            dispatch_lat_max_ms: latency_max,
            dispatch_lat_p99_ms: percentile_from_buckets(&dispatch_lat_buckets, 0.99),
            telemetry_received: self.telemetry_received.load(Ordering::Relaxed),
            telemetry_rejected: self.telemetry_rejected.load(Ordering::Relaxed),
            registered_devices: self.registered_devices.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub discovery_rounds: u64,
    pub discovery_failures: u64,
    pub last_round_devices: u64,
    pub registrations: u64,
    pub health_checks: u64,
    pub evictions: u64,
    pub commands_dispatched: u64,
    pub dispatch_failures: u64,
    pub dispatch_rejected: u64,
    pub commands_per_min: f64,
    /// Dispatch latency histogram buckets
    /// Bounds: ≤5, ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, >2560 ms
    pub dispatch_lat_buckets: [u64; NUM_BUCKETS],
    pub dispatch_lat_avg_ms: u64,
    pub dispatch_lat_max_ms: u64,
    pub dispatch_lat_p99_ms: u64,
    pub telemetry_received: u64,
    pub telemetry_rejected: u64,
    pub registered_devices: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            devices = %self.registered_devices,
            rounds = %self.discovery_rounds,
            last_round = %self.last_round_devices,
            registrations = %self.registrations,
            evictions = %self.evictions,
            commands = %self.commands_dispatched,
            dispatch_failures = %self.dispatch_failures,
            cmds_per_min = format!("{:.1}", self.commands_per_min),
            dispatch_p99_ms = %self.dispatch_lat_p99_ms,
            telemetry = %self.telemetry_received,
            telemetry_rejected = %self.telemetry_rejected,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.discovery_rounds(), 0);
        assert_eq!(metrics.commands_dispatched.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_discovery_round(3);
        metrics.record_discovery_round(2);
        metrics.record_dispatch(10);
        metrics.record_dispatch(20);
        metrics.record_dispatch(30);
        metrics.record_dispatch_failure();
        metrics.record_health_check(1);
        metrics.set_registered_devices(2);

        let summary = metrics.report();

        assert_eq!(summary.discovery_rounds, 2);
        assert_eq!(summary.last_round_devices, 2);
        assert_eq!(summary.commands_dispatched, 3);
        assert_eq!(summary.dispatch_lat_avg_ms, 20);
        assert_eq!(summary.dispatch_lat_max_ms, 30);
        assert_eq!(summary.dispatch_failures, 1);
        assert_eq!(summary.evictions, 1);
        assert_eq!(summary.registered_devices, 2);

        // Periodic counters should be reset, totals kept
        assert_eq!(metrics.dispatch_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.dispatch_latency_max_ms.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.report().commands_dispatched, 3);
    }

    #[test]
    fn test_report_empty() {
        let summary = Metrics::new().report();
        assert_eq!(summary.dispatch_lat_avg_ms, 0);
        assert_eq!(summary.dispatch_lat_p99_ms, 0);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    m.record_telemetry_received();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.telemetry_received(), 8_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(5), 0);
        assert_eq!(bucket_index(6), 1);
        assert_eq!(bucket_index(2560), 9);
        assert_eq!(bucket_index(2561), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_dispatch(15);
        }
        let summary = metrics.report();
        assert_eq!(summary.dispatch_lat_p99_ms, 20);
    }
}
