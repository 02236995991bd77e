//! Operation tables bound to the superblock and root inode.
//!
//! QFS only answers statfs locally; directory and file entry points are left
//! to the host framework's defaults.

/// Which object a table is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Superblock
    Super,
    /// Directory entries
    Dentry,
    /// Inodes
    Inode,
    /// Open files
    File,
}

/// Named entry points implemented for one object kind.
#[derive(Debug, PartialEq, Eq)]
pub struct OpTable {
    /// Object kind the table serves.
    pub kind: TableKind,
    /// Names of the entry points QFS provides itself.
    pub implemented: &'static [&'static str],
}

impl OpTable {
    /// True if `op` is implemented by this table.
    pub fn supports(&self, op: &str) -> bool {
        self.implemented.contains(&op)
    }
}

/// Superblock operations: statfs only.
pub static QFS_SUPER_OPS: OpTable = OpTable {
    kind: TableKind::Super,
    implemented: &["statfs"],
};

/// Dentry operations.
pub static QFS_DENTRY_OPS: OpTable = OpTable {
    kind: TableKind::Dentry,
    implemented: &[],
};

/// Inode operations.
pub static QFS_INODE_OPS: OpTable = OpTable {
    kind: TableKind::Inode,
    implemented: &[],
};

/// File operations.
pub static QFS_FILE_OPS: OpTable = OpTable {
    kind: TableKind::File,
    implemented: &[],
};
