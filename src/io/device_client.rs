//! HTTP transport from the gateway to actuator command servers

use crate::domain::command::{CommandReply, CommandRequest};
use crate::error::TransportError;
use crate::services::dispatcher::DeviceTransport;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub struct HttpDeviceClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpDeviceClient {
    pub fn new(timeout: Duration) -> Self {
        // One pooled client for every device
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .http1_only()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, timeout }
    }

    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout.as_millis() as u64)
        } else if e.is_decode() || e.is_body() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Connect(e.to_string())
        }
    }

    async fn read_body(&self, resp: reqwest::Response) -> Result<bytes::Bytes, TransportError> {
        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| self.map_error(e))?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl DeviceTransport for HttpDeviceClient {
    async fn send_command(
        &self,
        address: &str,
        request: &CommandRequest,
    ) -> Result<CommandReply, TransportError> {
        let payload = serde_json::to_vec(request).map_err(|e| TransportError::Decode(e.to_string()))?;
        let resp = self
            .http
            .post(format!("http://{address}/command"))
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let body = self.read_body(resp).await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn fetch_status(&self, address: &str) -> Result<Value, TransportError> {
        let resp = self
            .http
            .get(format!("http://{address}/status"))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let body = self.read_body(resp).await?;
        let mut value: Value =
            serde_json::from_slice(&body).map_err(|e| TransportError::Decode(e.to_string()))?;
        // Device servers wrap state as {deviceId, kind, state}
        let state = value.as_object_mut().and_then(|o| o.remove("state"));
        Ok(state.unwrap_or(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_maps_to_connect() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpDeviceClient::new(Duration::from_millis(500));
        let request = CommandRequest { command: "PowerOn".into(), params: Value::Null };
        let err = client.send_command(&addr.to_string(), &request).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "got {err:?}");
    }
}
