//! Error types for the RFLink integration

use ha_service_registry::ServiceError;
use std::time::Duration;
use thiserror::Error;

/// Failures of the byte-stream link to the gateway
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("line framing error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("cannot encode command: {0}")]
    Encode(#[from] crate::protocol::PacketError),

    #[error("no response from gateway within {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,
}

/// Errors surfaced by the integration to its callers
#[derive(Debug, Error)]
pub enum RflinkError {
    /// A command was attempted while no gateway connection is bound
    #[error("cannot send command, not connected")]
    NotConnected,

    #[error("gateway did not acknowledge '{command}' for {device_id}")]
    AckTimeout { device_id: String, command: String },

    #[error("gateway rejected '{command}' for {device_id}")]
    CommandRejected { device_id: String, command: String },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("{entity} does not support {command}")]
    Unsupported { entity: String, command: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = RflinkError> = std::result::Result<T, E>;

impl From<RflinkError> for ServiceError {
    fn from(err: RflinkError) -> Self {
        match err {
            RflinkError::InvalidCommand(_)
            | RflinkError::Unsupported { .. }
            | RflinkError::Config(_) => ServiceError::InvalidData(err.to_string()),
            other => ServiceError::CallFailed(other.to_string()),
        }
    }
}
