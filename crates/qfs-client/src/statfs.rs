//! Space usage reporting.
//!
//! The remote side exposes no space accounting, so these are the fixed
//! answers the host emulator expects.

use serde::Serialize;

use crate::superblock::SuperBlock;

/// Longest file name component reported.
pub const QFS_NAMELEN: u32 = 255;

/// Filesystem statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatFs {
    /// Filesystem magic.
    pub f_type: u32,
    /// Block size in bytes.
    pub f_bsize: u32,
    /// Maximum name length.
    pub f_namelen: u32,
    /// Total blocks.
    pub f_blocks: u64,
    /// Free blocks.
    pub f_bfree: u64,
    /// Blocks available to unprivileged users.
    pub f_bavail: u64,
}

/// Statistics for the instance behind `sb`.
pub fn statfs(sb: &SuperBlock) -> StatFs {
    StatFs {
        f_type: sb.magic(),
        f_bsize: sb.block_size(),
        f_namelen: QFS_NAMELEN,
        f_blocks: 1,
        f_bfree: 0,
        f_bavail: 0,
    }
}
