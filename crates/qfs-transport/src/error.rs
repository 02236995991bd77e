use thiserror::Error;

use crate::frame::Command;

/// Errors from the QRPC transport and device layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The provider could not open the named device.
    #[error("failed to open device {name}: {reason}")]
    DeviceOpen {
        /// Name passed to the provider.
        name: String,
        /// Why the open failed.
        reason: String,
    },

    /// A register access on an open device failed.
    #[error("device error on {device}: {reason}")]
    Device {
        /// Name of the device.
        device: String,
        /// What went wrong.
        reason: String,
    },

    /// Bytes read back do not form a valid frame.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// What was wrong with the bytes.
        reason: String,
    },

    /// The device did not complete a command in time.
    #[error("{command:?} not completed after {timeout_ms}ms")]
    Timeout {
        /// Command left pending.
        command: Command,
        /// Deadline that expired.
        timeout_ms: u64,
    },

    /// I/O error from the backing device.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
