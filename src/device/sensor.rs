//! Sensor telemetry publisher
//!
//! Publishes one reading per interval to the sensor kind's MQTT topic with
//! QoS 1. Readings are a bounded oscillation around a plausible baseline.

use crate::domain::types::DeviceKind;
use crate::domain::wire::TelemetryReading;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SensorSettings {
    pub sensor_id: String,
    pub kind: DeviceKind,
    pub topic: String,
    pub interval: Duration,
    pub mqtt_host: String,
    pub mqtt_port: u16,
}

impl SensorSettings {
    /// Publish interval used when none is given
    pub fn default_interval(kind: DeviceKind) -> Duration {
        match kind {
            DeviceKind::SensorAirQuality => Duration::from_secs(20),
            _ => Duration::from_secs(15),
        }
    }
}

/// Position in a 24-step triangle wave, as a fraction in `0.0..=1.0`
fn wave(tick: u64) -> f64 {
    let step = (tick % 24) as f64;
    if step <= 12.0 {
        step / 12.0
    } else {
        (24.0 - step) / 12.0
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub fn air_quality_label(pm25: f64) -> &'static str {
    match pm25 {
        v if v <= 12.0 => "GOOD",
        v if v <= 35.4 => "MODERATE",
        v if v <= 55.4 => "UNHEALTHY_SENSITIVE",
        _ => "UNHEALTHY",
    }
}

/// Kind-specific reading fields for the `tick`-th publish
pub fn synthesize(kind: DeviceKind, tick: u64) -> Map<String, Value> {
    let w = wave(tick);
    let mut fields = Map::new();
    match kind {
        DeviceKind::SensorTemperature => {
            fields.insert("value".into(), json!(round1(18.0 + 10.0 * w)));
            fields.insert("unit".into(), json!("C"));
        }
        DeviceKind::SensorAirQuality => {
            let pm25 = round1(5.0 + 40.0 * w);
            fields.insert("co2".into(), json!(round1(400.0 + 200.0 * w)));
            fields.insert("pm25".into(), json!(pm25));
            fields.insert("pm10".into(), json!(round1(10.0 + 60.0 * w)));
            fields.insert("quality".into(), json!(air_quality_label(pm25)));
        }
        _ => {}
    }
    fields
}

pub fn reading(settings: &SensorSettings, tick: u64) -> TelemetryReading {
    TelemetryReading {
        sensor_id: settings.sensor_id.clone(),
        timestamp: Utc::now(),
        fields: synthesize(settings.kind, tick),
    }
}

/// Publish readings until shutdown
pub async fn run_publisher(settings: SensorSettings, mut shutdown: watch::Receiver<bool>) {
    let client_id = format!("{}-{}", settings.sensor_id, std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, settings.mqtt_host.clone(), settings.mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    mqttoptions.set_clean_session(true);

    let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

    tokio::spawn(async move {
        let mut eventloop = eventloop;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("sensor_mqtt_connected");
                }
                Ok(Event::Incoming(Packet::PubAck(_))) => {
                    debug!("sensor_mqtt_puback");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "sensor_mqtt_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    info!(
        sensor_id = %settings.sensor_id,
        topic = %settings.topic,
        interval_secs = %settings.interval.as_secs(),
        "sensor_publisher_started"
    );

    let mut interval = tokio::time::interval(settings.interval);
    let mut tick = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let payload = match serde_json::to_vec(&reading(&settings, tick)) {
                    Ok(p) => p,
                    Err(e) => {
                        error!(error = %e, "sensor_reading_encode_failed");
                        continue;
                    }
                };
                if let Err(e) = client.publish(&settings.topic, QoS::AtLeastOnce, false, payload).await {
                    error!(error = %e, "sensor_publish_failed");
                } else {
                    debug!(sensor_id = %settings.sensor_id, tick = %tick, "reading_published");
                }
                tick += 1;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(sensor_id = %settings.sensor_id, "sensor_publisher_shutdown");
                    let _ = client.disconnect().await;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_stays_in_band() {
        for tick in 0..48 {
            let fields = synthesize(DeviceKind::SensorTemperature, tick);
            let v = fields["value"].as_f64().unwrap();
            assert!((18.0..=28.0).contains(&v), "temperature {v} out of band");
        }
    }

    #[test]
    fn test_air_quality_fields() {
        let fields = synthesize(DeviceKind::SensorAirQuality, 3);
        for key in ["co2", "pm25", "pm10", "quality"] {
            assert!(fields.contains_key(key), "missing {key}");
        }
        assert_eq!(air_quality_label(8.0), "GOOD");
        assert_eq!(air_quality_label(40.0), "UNHEALTHY_SENSITIVE");
    }

    #[test]
    fn test_reading_serializes_flat() {
        let settings = SensorSettings {
            sensor_id: "TEMP001".into(),
            kind: DeviceKind::SensorTemperature,
            topic: "city/sensors/temperature".into(),
            interval: Duration::from_secs(15),
            mqtt_host: "localhost".into(),
            mqtt_port: 1883,
        };
        let json = serde_json::to_value(reading(&settings, 0)).unwrap();
        assert_eq!(json["sensorId"], "TEMP001");
        assert_eq!(json["value"], 18.0);
        assert_eq!(json["unit"], "C");
    }
}
