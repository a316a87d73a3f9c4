//! Prometheus text exposition for gateway metrics
//!
//! Served by the gateway API at `GET /metrics`.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with gateway label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, gateway: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{gateway=\"{gateway}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    gateway: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{gateway=\"{gateway}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{gateway=\"{gateway}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{gateway=\"{gateway}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{gateway=\"{gateway}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, gateway_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_registry_metrics(&mut output, gateway_id, &summary);
    write_dispatch_metrics(&mut output, gateway_id, &summary);
    write_telemetry_metrics(&mut output, gateway_id, &summary);

    output
}

fn write_registry_metrics(output: &mut String, gw: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "city_registered_devices",
        "Devices currently in the registry",
        MetricType::Gauge,
        gw,
        summary.registered_devices,
    );
    write_metric(
        output,
        "city_discovery_rounds_total",
        "Discovery rounds completed",
        MetricType::Counter,
        gw,
        summary.discovery_rounds,
    );
    write_metric(
        output,
        "city_discovery_failures_total",
        "Discovery rounds aborted by a socket error",
        MetricType::Counter,
        gw,
        summary.discovery_failures,
    );
    write_metric(
        output,
        "city_discovery_last_round_devices",
        "Devices answering the most recent discovery round",
        MetricType::Gauge,
        gw,
        summary.last_round_devices,
    );
    write_metric(
        output,
        "city_registrations_total",
        "Devices registered through POST /registry",
        MetricType::Counter,
        gw,
        summary.registrations,
    );
    write_metric(
        output,
        "city_health_checks_total",
        "Health passes completed",
        MetricType::Counter,
        gw,
        summary.health_checks,
    );
    write_metric(
        output,
        "city_evictions_total",
        "Devices evicted by the health monitor",
        MetricType::Counter,
        gw,
        summary.evictions,
    );
}

fn write_dispatch_metrics(output: &mut String, gw: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "city_commands_dispatched_total",
        "Commands delivered to a device",
        MetricType::Counter,
        gw,
        summary.commands_dispatched,
    );
    write_metric(
        output,
        "city_dispatch_failures_total",
        "Commands that failed in transport",
        MetricType::Counter,
        gw,
        summary.dispatch_failures,
    );
    write_metric(
        output,
        "city_dispatch_rejected_total",
        "Commands refused before leaving the gateway",
        MetricType::Counter,
        gw,
        summary.dispatch_rejected,
    );
    write_histogram(
        output,
        "city_dispatch_latency_ms",
        "Command round-trip latency in milliseconds",
        gw,
        &summary.dispatch_lat_buckets,
        summary.dispatch_lat_avg_ms,
    );
    write_metric(
        output,
        "city_dispatch_latency_p99_ms",
        "99th percentile command latency",
        MetricType::Gauge,
        gw,
        summary.dispatch_lat_p99_ms,
    );
    write_metric(
        output,
        "city_dispatch_latency_max_ms",
        "Maximum command latency",
        MetricType::Gauge,
        gw,
        summary.dispatch_lat_max_ms,
    );
}

fn write_telemetry_metrics(output: &mut String, gw: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "city_telemetry_received_total",
        "Sensor readings recorded",
        MetricType::Counter,
        gw,
        summary.telemetry_received,
    );
    write_metric(
        output,
        "city_telemetry_rejected_total",
        "Sensor messages dropped as malformed",
        MetricType::Counter,
        gw,
        summary.telemetry_rejected,
    );
}
