//! Error types for the QFS client.

use qfs_transport::{DeviceId, TransportError};
use thiserror::Error;

/// Result type alias for mount operations.
pub type MountResult<T> = Result<T, MountError>;

/// Errors that can occur while mounting or unmounting QFS.
#[derive(Debug, Error)]
pub enum MountError {
    /// The block device could not be opened.
    #[error("Cannot open device {name}: {source}")]
    DeviceOpenFailed {
        /// Device name passed to mount.
        name: String,
        /// Underlying provider error.
        #[source]
        source: TransportError,
    },

    /// The device does not expose a QRPC control region.
    #[error("Not a QRPC block device: {name}")]
    NotQrpcDevice {
        /// Device name passed to mount.
        name: String,
    },

    /// Per-instance state could not be allocated.
    #[error("Unable to allocate instance state: {reason}")]
    AllocationFailed {
        /// Description of the failure.
        reason: String,
    },

    /// The device already backs a mounted instance.
    #[error("Already mounted: {device}")]
    AlreadyMounted {
        /// Identity of the device.
        device: DeviceId,
    },

    /// The remote side answered MOUNT with a non-OK status.
    #[error("Remote mount rejected on {name}")]
    RemoteMountRejected {
        /// Device name passed to mount.
        name: String,
    },

    /// The device never completed a transfer.
    #[error("Transfer timed out after {timeout_ms}ms")]
    TransferTimeout {
        /// Deadline that expired.
        timeout_ms: u64,
    },

    /// No instance is mounted on the device.
    #[error("Not mounted: {device}")]
    NotMounted {
        /// Identity of the device.
        device: DeviceId,
    },

    /// Invalid mount option.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Any other transport failure.
    #[error("Transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for MountError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout { timeout_ms, .. } => MountError::TransferTimeout { timeout_ms },
            other => MountError::Transport(other),
        }
    }
}
