//! Block device abstraction consumed by the QRPC transport.
//!
//! The host framework opens devices through a [`DeviceProvider`] and hands
//! back a [`DeviceHandle`]. The handle owns the open device and releases it
//! when dropped, so every early return in a mount path gives the device back.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Offset of the frame window inside the control region.
pub const FRAME_OFFSET: u64 = 0;

/// Offset of the 4-byte transport signature register.
pub const SIGNATURE_OFFSET: u64 = 0x800;

/// Signature a QRPC-capable device exposes at [`SIGNATURE_OFFSET`].
pub const QRPC_SIGNATURE: [u8; 4] = *b"QRPC";

/// Size of the memory-mapped control region.
pub const CONTROL_REGION_SIZE: usize = 4096;

/// Stable identity of a block device, independent of the name used to open it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0 >> 20, self.0 & 0xF_FFFF)
    }
}

/// Access mode requested when opening a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessMode(u8);

impl AccessMode {
    /// Read access
    pub const READ: Self = Self(1);
    /// Write access
    pub const WRITE: Self = Self(2);
    /// Exclusive open
    pub const EXCL: Self = Self(4);

    /// No access bits.
    pub fn empty() -> Self {
        Self(0)
    }

    /// True if every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Mode used by a mount: shared-nothing read access, plus write access
    /// unless the mount is read-only.
    pub fn for_mount(read_only: bool) -> Self {
        let mode = Self::READ | Self::EXCL;
        if read_only {
            mode
        } else {
            mode | Self::WRITE
        }
    }
}

impl std::ops::BitOr for AccessMode {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Default for AccessMode {
    fn default() -> Self {
        Self::empty()
    }
}

/// A block device with a memory-mapped QRPC control region.
#[async_trait]
pub trait BlockDevice: Send + Sync + fmt::Debug {
    /// Device identity used for mount deduplication.
    fn id(&self) -> DeviceId;

    /// Name the device was registered under.
    fn name(&self) -> &str;

    /// Copy `buf.len()` bytes out of the control region starting at `offset`.
    async fn read_window(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Copy `data` into the control region starting at `offset`.
    async fn write_window(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Tell the remote side a command is pending in the frame window.
    async fn signal_pending(&self) -> Result<()>;

    /// Resolve once the remote side has written a terminal status.
    async fn wait_complete(&self) -> Result<()>;

    /// Give back one open reference taken with `mode`.
    fn release(&self, mode: AccessMode);
}

/// Opens block devices by name. Provided by the host framework.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Open the device called `name` with `mode`.
    async fn open(&self, name: &str, mode: AccessMode) -> Result<DeviceHandle>;
}

/// Ownership of one open reference to a block device.
pub struct DeviceHandle {
    device: Arc<dyn BlockDevice>,
    mode: AccessMode,
}

impl DeviceHandle {
    /// Wrap a device that has just been opened with `mode`.
    pub fn new(device: Arc<dyn BlockDevice>, mode: AccessMode) -> Self {
        Self { device, mode }
    }

    /// The opened device.
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    /// Identity of the opened device.
    pub fn id(&self) -> DeviceId {
        self.device.id()
    }

    /// Name of the opened device.
    pub fn name(&self) -> &str {
        self.device.name()
    }

    /// Mode the device was opened with.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device", &self.device.name())
            .field("id", &self.device.id())
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        debug!(device = self.device.name(), id = %self.device.id(), "releasing device");
        self.device.release(self.mode);
    }
}
