//! MQTT client for receiving sensor telemetry

use crate::domain::wire::TelemetryReading;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::registry::DeviceRegistry;
use crate::services::telemetry::{SensorChannel, TelemetryStore};
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Why a telemetry message was dropped
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("no sensor channel for topic {0}")]
    UnknownTopic(String),
    #[error("malformed reading: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Turns MQTT publishes into store updates and registry touches
pub struct TelemetryIngest {
    registry: Arc<DeviceRegistry>,
    store: Arc<TelemetryStore>,
    metrics: Arc<Metrics>,
    temperature_topic: String,
    air_quality_topic: String,
}

impl TelemetryIngest {
    pub fn new(
        config: &Config,
        registry: Arc<DeviceRegistry>,
        store: Arc<TelemetryStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            store,
            metrics,
            temperature_topic: config.mqtt_temperature_topic().to_string(),
            air_quality_topic: config.mqtt_air_quality_topic().to_string(),
        }
    }

    pub fn topics(&self) -> [&str; 2] {
        [&self.temperature_topic, &self.air_quality_topic]
    }

    pub fn channel_for_topic(&self, topic: &str) -> Option<SensorChannel> {
        if topic == self.temperature_topic {
            Some(SensorChannel::Temperature)
        } else if topic == self.air_quality_topic {
            Some(SensorChannel::AirQuality)
        } else {
            None
        }
    }

    /// Record one message; returns the sensor id on success
    pub fn ingest(
        &self,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<String, IngestError> {
        let result = self.parse(topic, payload);
        let (channel, reading) = match result {
            Ok(parsed) => parsed,
            Err(e) => {
                self.metrics.record_telemetry_rejected();
                return Err(e);
            }
        };

        let sensor_id = reading.sensor_id.clone();
        self.store.record(channel, reading, received_at);
        self.registry.touch(&sensor_id, received_at);
        self.metrics.record_telemetry_received();
        Ok(sensor_id)
    }

    fn parse(&self, topic: &str, payload: &[u8]) -> Result<(SensorChannel, TelemetryReading), IngestError> {
        let channel = self
            .channel_for_topic(topic)
            .ok_or_else(|| IngestError::UnknownTopic(topic.to_string()))?;
        let reading: TelemetryReading = serde_json::from_slice(payload)?;
        Ok((channel, reading))
    }
}

/// Subscribe to both sensor topics and feed the ingest until shutdown
///
/// Bad payloads are logged (rate-limited) and counted; broker errors back off
/// for a second and the loop carries on.
pub async fn start_mqtt_client(
    config: &Config,
    ingest: Arc<TelemetryIngest>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("{}-telemetry", config.gateway_id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    for topic in ingest.topics() {
        client.subscribe(topic, QoS::AtLeastOnce).await?;
    }

    info!(
        temperature_topic = %config.mqtt_temperature_topic(),
        air_quality_topic = %config.mqtt_air_quality_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_subscribed"
    );

    let mut last_reject_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match ingest.ingest(&publish.topic, &publish.payload, Utc::now()) {
                            Ok(sensor_id) => {
                                debug!(topic = %publish.topic, sensor_id = %sensor_id, "telemetry_received");
                            }
                            Err(e) => {
                                if last_reject_warn.elapsed() > Duration::from_secs(1) {
                                    warn!(topic = %publish.topic, error = %e, "telemetry_rejected");
                                    last_reject_warn = Instant::now();
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                        // Subscriptions do not survive a clean-session reconnect
                        for topic in ingest.topics() {
                            if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
                                warn!(topic = %topic, error = %e, "mqtt_resubscribe_failed");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
