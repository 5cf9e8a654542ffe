//! Gateway error types

use crate::core::status::DeviceFamily;
use thiserror::Error;

/// Errors produced while negotiating, parsing and dispatching telemetry
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No negotiator candidate recognized the stream
    #[error("No candidate protocol matched the stream")]
    UnknownProtocol,

    /// Device identifier failed the allow-list check
    #[error("Device {device_id} is not authorized")]
    UnauthorizedDevice {
        /// Identifier reported at login
        device_id: String,
    },

    /// Frame checksum did not validate
    #[error("Bad {family} checksum: expected {expected:#06x}, got {got:#06x}")]
    BadChecksum {
        /// Protocol family of the failing frame
        family: DeviceFamily,
        /// Checksum carried in the frame
        expected: u16,
        /// Checksum computed over the received bytes
        got: u16,
    },

    /// Malformed length, field value or framing
    #[error("Bad packet: {0}")]
    BadPacket(String),

    /// Stream ended in the middle of a frame
    #[error("Stream ended mid-frame")]
    Truncated,

    /// Stream ended cleanly at a frame boundary (not a failure)
    #[error("Connection closed")]
    Closed,

    /// Dispatch queue consumer is gone
    #[error("Dispatch queue closed")]
    QueueClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage collaborator error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl GatewayError {
    /// True for the clean end-of-stream signal, which ends a worker silently
    pub fn is_clean_close(&self) -> bool {
        matches!(self, GatewayError::Closed)
    }
}

/// Errors surfaced by the storage collaborator
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying I/O failure
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be serialized
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Backend rejected the write
    #[error("Store rejected write: {0}")]
    Rejected(String),
}
