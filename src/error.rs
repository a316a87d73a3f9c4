//! Error types shared by the gateway services and the device runtime

use hyper::StatusCode;
use thiserror::Error;

/// Failure to turn a command name and parameters into a typed command
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command '{command}' is not supported by {kind}")]
    Unsupported { command: String, kind: String },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

/// Failure talking to a device over the command channel
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device has no address")]
    NoAddress,

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("device answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed device reply: {0}")]
    Decode(String),
}

/// Result of a failed liveness probe; only used to drive eviction
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("device has no address")]
    NoAddress,

    #[error("probe timed out after {0} ms")]
    Timeout(u64),

    #[error("probe failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Uniform failure returned by the command dispatcher
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("dispatch failed: {0}")]
    DispatchFailure(#[from] TransportError),
}

impl From<CommandError> for DispatchError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Unsupported { .. } => DispatchError::UnsupportedCommand(e.to_string()),
            CommandError::InvalidParams(msg) => DispatchError::InvalidParams(msg),
        }
    }
}

impl DispatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::UnsupportedCommand(_) | DispatchError::InvalidParams(_) => {
                StatusCode::BAD_REQUEST
            }
            DispatchError::DispatchFailure(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable error code for API bodies
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::DeviceNotFound(_) => "DeviceNotFound",
            DispatchError::UnsupportedCommand(_) => "UnsupportedCommand",
            DispatchError::InvalidParams(_) => "InvalidParams",
            DispatchError::DispatchFailure(_) => "DispatchFailure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(DispatchError::DeviceNotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            DispatchError::UnsupportedCommand("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(DispatchError::InvalidParams("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            DispatchError::DispatchFailure(TransportError::Timeout(3000)).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_command_error_conversion() {
        let err: DispatchError =
            CommandError::Unsupported { command: "SetResolution".into(), kind: "STREETLIGHT".into() }
                .into();
        assert_eq!(err.code(), "UnsupportedCommand");
        assert!(err.to_string().contains("SetResolution"));

        let err: DispatchError = CommandError::InvalidParams("intensity out of range".into()).into();
        assert!(matches!(err, DispatchError::InvalidParams(ref m) if m == "intensity out of range"));
    }
}
