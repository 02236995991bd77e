#![warn(missing_docs)]

//! QFS client: mounts a filesystem instance on top of a QRPC block device
//!
//! This crate drives the guest side of QFS. It validates a candidate device,
//! binds a superblock for it in an explicit registry, builds the root
//! directory and performs the MOUNT handshake over the transport provided by
//! `qfs-transport`.

pub mod config;
pub mod error;
pub mod fs_type;
pub mod inode;
pub mod mount;
pub mod ops;
pub mod options;
pub mod registry;
pub mod statfs;
pub mod superblock;

pub use config::ClientConfig;
pub use error::{MountError, MountResult};
pub use fs_type::{FileSystemTable, FileSystemType, RegistrationError};
pub use inode::{FileType, Inode, InodeId, ROOT_INO};
pub use mount::{QfsFileSystem, RootHandle};
pub use options::{parse_mount_options, MountOptions};
pub use registry::{MountRegistry, MountState};
pub use statfs::StatFs;
pub use superblock::{SuperBlock, QFS_BLOCK_SIZE, QFS_BLOCK_SIZE_BITS, QFS_MAGIC};
