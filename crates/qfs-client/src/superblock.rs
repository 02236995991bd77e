//! Per-instance superblock: fixed geometry, operation tables, root entry and
//! the transport that owns the backing device.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use qfs_transport::{DeviceId, QrpcTransport};
use tracing::debug;

use crate::inode::Inode;
use crate::ops::{OpTable, QFS_DENTRY_OPS, QFS_SUPER_OPS};
use crate::options::MountOptions;
use crate::registry::InstanceSlot;

/// Block size reported for every instance.
pub const QFS_BLOCK_SIZE: u32 = 2048;
/// log2 of [`QFS_BLOCK_SIZE`].
pub const QFS_BLOCK_SIZE_BITS: u8 = 11;
/// Filesystem type signature: "QRFS" read as a little-endian word.
pub const QFS_MAGIC: u32 = u32::from_le_bytes(*b"QRFS");

/// Private per-mount state. Carries no fields yet beyond the allocation slot
/// it was charged against.
#[derive(Debug)]
pub struct QfsSuperInfo {
    _slot: InstanceSlot,
}

impl QfsSuperInfo {
    pub(crate) fn new(slot: InstanceSlot) -> Self {
        Self { _slot: slot }
    }
}

/// One mounted QFS instance.
#[derive(Debug)]
pub struct SuperBlock {
    device_id: DeviceId,
    device_name: String,
    options: MountOptions,
    block_size: u32,
    block_size_bits: u8,
    magic: u32,
    super_ops: &'static OpTable,
    dentry_ops: &'static OpTable,
    info: Mutex<Option<QfsSuperInfo>>,
    root: OnceLock<Arc<Inode>>,
    transport: Mutex<Option<Arc<QrpcTransport>>>,
}

impl SuperBlock {
    /// Create a superblock with the fixed QFS parameters.
    pub(crate) fn new(transport: QrpcTransport, options: MountOptions, info: QfsSuperInfo) -> Self {
        let sb = Self {
            device_id: transport.device_id(),
            device_name: transport.device_name().to_string(),
            options,
            block_size: QFS_BLOCK_SIZE,
            block_size_bits: QFS_BLOCK_SIZE_BITS,
            magic: QFS_MAGIC,
            super_ops: &QFS_SUPER_OPS,
            dentry_ops: &QFS_DENTRY_OPS,
            info: Mutex::new(Some(info)),
            root: OnceLock::new(),
            transport: Mutex::new(Some(Arc::new(transport))),
        };
        debug!(
            device = %sb.device_name,
            block_size = sb.block_size,
            magic = format_args!("{:#010x}", sb.magic),
            "superblock configured"
        );
        sb
    }

    /// Identity of the backing device.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Name the device was opened under.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Options the instance was mounted with.
    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// log2 of the block size.
    pub fn block_size_bits(&self) -> u8 {
        self.block_size_bits
    }

    /// Filesystem type signature.
    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// Superblock operation table.
    pub fn super_ops(&self) -> &'static OpTable {
        self.super_ops
    }

    /// Dentry operation table.
    pub fn dentry_ops(&self) -> &'static OpTable {
        self.dentry_ops
    }

    /// Root inode, once installed.
    pub fn root(&self) -> Option<&Arc<Inode>> {
        self.root.get()
    }

    /// Install the root entry. Fails with the rejected inode if a root is
    /// already set: the root is never replaced for an instance's lifetime.
    pub(crate) fn set_root(&self, root: Arc<Inode>) -> Result<(), Arc<Inode>> {
        self.root.set(root)
    }

    /// Transport to the backing device, `None` once torn down.
    pub fn transport(&self) -> Option<Arc<QrpcTransport>> {
        self.transport.lock().clone()
    }

    /// True until the instance has been torn down.
    pub fn is_active(&self) -> bool {
        self.transport.lock().is_some()
    }

    /// Drop the instance state and hand back the transport for a final
    /// UNMOUNT. The device is released when the returned transport drops.
    pub(crate) fn shutdown(&self) -> Option<Arc<QrpcTransport>> {
        self.info.lock().take();
        self.transport.lock().take()
    }
}
