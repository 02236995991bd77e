//! QRPC frame definitions and serialization.
//!
//! A frame is the register block shared with the host emulator: a command
//! byte, a status byte and a fixed payload, packed with no padding. The layout
//! is shared verbatim with the remote side, so field order and sizes must not
//! change.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Payload size in bytes.
pub const PAYLOAD_SIZE: usize = 1024;

/// Encoded frame size in bytes (cmd:1 + status:1 + payload:1024).
pub const FRAME_SIZE: usize = 2 + PAYLOAD_SIZE;

/// Commands understood by the host emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    /// Transport initialization
    Init = 0,
    /// A filesystem instance has been mounted
    Mount = 1,
    /// A filesystem instance is being torn down
    Unmount = 2,
}

impl Command {
    /// Raw register value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a raw register value.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Command::Init),
            1 => Some(Command::Mount),
            2 => Some(Command::Unmount),
            _ => None,
        }
    }
}

/// Completion status, written only by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    /// Operation completed
    Ok = 0,
    /// Operation failed, also the sentinel a caller writes before a transfer
    Error = 1,
}

impl Status {
    /// Raw register value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a raw register value.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Status::Ok),
            1 => Some(Status::Error),
            _ => None,
        }
    }

    /// True for [`Status::Ok`].
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

/// A single QRPC request or response.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command register
    pub command: Command,
    /// Status register
    pub status: Status,
    /// Command-specific arguments or results
    pub payload: [u8; PAYLOAD_SIZE],
}

impl Frame {
    /// Build a request for `command` with an empty payload.
    ///
    /// The status is preset to [`Status::Error`] so that a transfer which
    /// never reaches the device cannot be mistaken for success.
    pub fn request(command: Command) -> Self {
        Self {
            command,
            status: Status::Error,
            payload: [0u8; PAYLOAD_SIZE],
        }
    }

    /// Build a request carrying `data` at the start of the payload.
    pub fn with_payload(command: Command, data: &[u8]) -> Result<Self> {
        if data.len() > PAYLOAD_SIZE {
            return Err(TransportError::InvalidFrame {
                reason: format!("payload of {} bytes exceeds {}", data.len(), PAYLOAD_SIZE),
            });
        }
        let mut frame = Self::request(command);
        frame.payload[..data.len()].copy_from_slice(data);
        Ok(frame)
    }

    /// Serialize to the wire layout.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut buf = [0u8; FRAME_SIZE];
        buf[0] = self.command.as_u8();
        buf[1] = self.status.as_u8();
        buf[2..].copy_from_slice(&self.payload);
        buf
    }

    /// Parse the wire layout.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_SIZE {
            return Err(TransportError::InvalidFrame {
                reason: format!("expected {} bytes, got {}", FRAME_SIZE, buf.len()),
            });
        }
        let command = Command::from_u8(buf[0]).ok_or_else(|| TransportError::InvalidFrame {
            reason: format!("unknown command 0x{:02X}", buf[0]),
        })?;
        let status = Status::from_u8(buf[1]).ok_or_else(|| TransportError::InvalidFrame {
            reason: format!("unknown status 0x{:02X}", buf[1]),
        })?;
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&buf[2..FRAME_SIZE]);
        Ok(Self {
            command,
            status,
            payload,
        })
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let used = self
            .payload
            .iter()
            .rposition(|b| *b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        f.debug_struct("Frame")
            .field("command", &self.command)
            .field("status", &self.status)
            .field("payload_used", &used)
            .finish()
    }
}
