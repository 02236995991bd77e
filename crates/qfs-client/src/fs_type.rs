//! Filesystem type registration.
//!
//! A host framework keeps a table of filesystem types by name and dispatches
//! mount requests to the matching entry.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use qfs_transport::{DeviceId, DeviceProvider};
use thiserror::Error;
use tracing::info;

use crate::error::MountResult;
use crate::mount::RootHandle;
use crate::options::MountOptions;

/// A mountable filesystem type.
#[async_trait]
pub trait FileSystemType: Send + Sync {
    /// Name used to select the type, e.g. in `mount -t`.
    fn name(&self) -> &'static str;

    /// Mount the device called `dev_name` and return its root.
    async fn mount(
        &self,
        provider: &dyn DeviceProvider,
        dev_name: &str,
        options: &MountOptions,
    ) -> MountResult<RootHandle>;

    /// Tear down the instance backed by `device`.
    async fn kill_sb(&self, device: DeviceId) -> MountResult<()>;
}

/// Errors from the filesystem type table.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// A type with this name is already registered.
    #[error("Filesystem type already registered: {0}")]
    AlreadyRegistered(String),

    /// No type with this name is registered.
    #[error("Filesystem type not registered: {0}")]
    NotRegistered(String),
}

/// Registered filesystem types, by name.
#[derive(Default)]
pub struct FileSystemTable {
    types: DashMap<&'static str, Arc<dyn FileSystemType>>,
}

impl FileSystemTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `fs` under its name. Names are unique.
    pub fn register(&self, fs: Arc<dyn FileSystemType>) -> Result<(), RegistrationError> {
        let name = fs.name();
        match self.types.entry(name) {
            Entry::Occupied(_) => Err(RegistrationError::AlreadyRegistered(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(fs);
                info!(fs_type = name, "filesystem type registered");
                Ok(())
            }
        }
    }

    /// Remove the type called `name` and hand it back.
    pub fn unregister(&self, name: &str) -> Result<Arc<dyn FileSystemType>, RegistrationError> {
        let (_, fs) = self
            .types
            .remove(name)
            .ok_or_else(|| RegistrationError::NotRegistered(name.to_string()))?;
        info!(fs_type = name, "filesystem type unregistered");
        Ok(fs)
    }

    /// Look up a type by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn FileSystemType>> {
        self.types.get(name).map(|e| e.value().clone())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.types.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        names
    }
}
