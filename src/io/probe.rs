//! TCP connect readiness probe used by the health monitor

use crate::error::ProbeError;
use crate::services::health::LivenessProbe;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A probe succeeds when a TCP connection to the device's command address opens in time
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl LivenessProbe for TcpProbe {
    async fn probe(&self, address: &str) -> Result<(), ProbeError> {
        if address.is_empty() {
            return Err(ProbeError::NoAddress);
        }
        match timeout(self.timeout, TcpStream::connect(address)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(ProbeError::Io(e)),
            Err(_) => Err(ProbeError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let probe = TcpProbe::new(Duration::from_secs(1));
        assert!(probe.probe(&addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let probe = TcpProbe::new(Duration::from_secs(1));
        assert!(probe.probe(&addr).await.is_err());
        assert!(matches!(probe.probe("").await, Err(ProbeError::NoAddress)));
    }
}
