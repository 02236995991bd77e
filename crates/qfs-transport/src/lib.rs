#![warn(missing_docs)]

//! QFS transport subsystem: QRPC frame codec and blocking call/response over
//! a block device's memory-mapped control region.

pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod sim;
pub mod transport;

pub use config::TransportConfig;
pub use device::{AccessMode, BlockDevice, DeviceHandle, DeviceId, DeviceProvider};
pub use error::{Result, TransportError};
pub use frame::{Command, Frame, Status, FRAME_SIZE, PAYLOAD_SIZE};
pub use sim::{SimBehavior, SimDevice, SimProvider};
pub use transport::{validate, QrpcTransport, TransferState};
