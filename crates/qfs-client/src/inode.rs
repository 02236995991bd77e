//! In-memory inodes for a QFS instance.

use std::sync::Arc;

use crate::ops::{OpTable, QFS_FILE_OPS, QFS_INODE_OPS};

/// Inode number.
pub type InodeId = u64;

/// Inode number of the filesystem root.
pub const ROOT_INO: InodeId = 1;

/// Type of file an inode represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file
    RegularFile,
    /// Directory
    Directory,
}

/// A fully constructed inode.
#[derive(Debug)]
pub struct Inode {
    ino: InodeId,
    file_type: FileType,
    inode_ops: &'static OpTable,
    file_ops: &'static OpTable,
}

impl Inode {
    /// Start building inode `ino`. The inode stays locked, and so invisible to
    /// anyone else, until [`NewInode::unlock`] is called.
    pub fn new_locked(ino: InodeId) -> NewInode {
        NewInode {
            ino,
            file_type: FileType::RegularFile,
            inode_ops: &QFS_INODE_OPS,
            file_ops: &QFS_FILE_OPS,
        }
    }

    /// Inode number.
    pub fn ino(&self) -> InodeId {
        self.ino
    }

    /// Type of file.
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// True for directories.
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// Inode operation table.
    pub fn inode_ops(&self) -> &'static OpTable {
        self.inode_ops
    }

    /// File operation table.
    pub fn file_ops(&self) -> &'static OpTable {
        self.file_ops
    }
}

/// An inode under construction.
#[derive(Debug)]
pub struct NewInode {
    ino: InodeId,
    file_type: FileType,
    inode_ops: &'static OpTable,
    file_ops: &'static OpTable,
}

impl NewInode {
    /// Set the file type the inode will be published with.
    pub fn set_file_type(&mut self, file_type: FileType) -> &mut Self {
        self.file_type = file_type;
        self
    }

    /// Attach inode and file operation tables.
    pub fn set_ops(&mut self, inode_ops: &'static OpTable, file_ops: &'static OpTable) -> &mut Self {
        self.inode_ops = inode_ops;
        self.file_ops = file_ops;
        self
    }

    /// Publish the inode.
    pub fn unlock(self) -> Arc<Inode> {
        Arc::new(Inode {
            ino: self.ino,
            file_type: self.file_type,
            inode_ops: self.inode_ops,
            file_ops: self.file_ops,
        })
    }
}
