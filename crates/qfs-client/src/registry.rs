//! Registry of mounted instances keyed by device identity.
//!
//! The registry answers "is this device already mounted" and bounds how many
//! instance states may exist at once. An entry stays in the map from the
//! moment a mount reserves the device until its teardown handshake is over,
//! so at most one instance ever talks to a device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use qfs_transport::DeviceId;
use tracing::{debug, warn};

use crate::error::{MountError, MountResult};
use crate::superblock::{QfsSuperInfo, SuperBlock};

/// Charge for one live instance state. Returned to the pool on drop.
#[derive(Debug)]
pub struct InstanceSlot {
    allocated: Arc<AtomicUsize>,
}

impl Drop for InstanceSlot {
    fn drop(&mut self) {
        self.allocated.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Lifecycle of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    /// Reserved by a mount that has not finished its handshake
    Pending,
    /// Mount completed; the instance is live
    Mounted,
    /// Teardown in progress, UNMOUNT may still be outstanding
    Unmounting,
}

#[derive(Debug)]
struct MountEntry {
    sb: Arc<SuperBlock>,
    state: MountState,
}

/// Mounted instances, one per device.
#[derive(Debug)]
pub struct MountRegistry {
    mounts: DashMap<DeviceId, MountEntry>,
    allocated: Arc<AtomicUsize>,
    peak: AtomicUsize,
    max_instances: usize,
}

impl MountRegistry {
    /// Create an empty registry allowing `max_instances` live instance states.
    pub fn new(max_instances: usize) -> Self {
        Self {
            mounts: DashMap::new(),
            allocated: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
            max_instances,
        }
    }

    /// Allocate private state for a new instance.
    pub fn allocate_info(&self) -> MountResult<QfsSuperInfo> {
        let max = self.max_instances;
        let prev = self
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map_err(|n| {
                warn!(allocated = n, max, "instance state limit reached");
                MountError::AllocationFailed {
                    reason: format!("{} of {} instance states in use", n, max),
                }
            })?;
        self.peak.fetch_max(prev + 1, Ordering::AcqRel);
        Ok(QfsSuperInfo::new(InstanceSlot {
            allocated: self.allocated.clone(),
        }))
    }

    /// Number of instance states currently allocated.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Highest number of instance states ever allocated at once.
    pub fn peak_allocated(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Reserve `device` for a new instance built by `make`.
    ///
    /// The device is checked first: a bound device fails with
    /// [`MountError::AlreadyMounted`] before any instance state is charged.
    /// `make` only runs once the device is free and the state is allocated.
    /// The reservation is undone when the returned guard drops without
    /// [`Binding::commit`].
    pub fn bind<F>(&self, device: DeviceId, make: F) -> MountResult<Binding<'_>>
    where
        F: FnOnce(QfsSuperInfo) -> SuperBlock,
    {
        match self.mounts.entry(device) {
            Entry::Occupied(entry) => {
                debug!(%device, state = ?entry.get().state, "device already bound");
                Err(MountError::AlreadyMounted { device })
            }
            Entry::Vacant(slot) => {
                let info = self.allocate_info()?;
                let sb = Arc::new(make(info));
                slot.insert(MountEntry {
                    sb: sb.clone(),
                    state: MountState::Pending,
                });
                debug!(%device, "superblock bound");
                Ok(Binding {
                    registry: self,
                    sb,
                    committed: false,
                })
            }
        }
    }

    /// Superblock bound to `device`, whatever its state.
    pub fn get(&self, device: DeviceId) -> Option<Arc<SuperBlock>> {
        self.mounts.get(&device).map(|e| e.sb.clone())
    }

    /// State of the entry bound to `device`.
    pub fn state(&self, device: DeviceId) -> Option<MountState> {
        self.mounts.get(&device).map(|e| e.state)
    }

    /// Move a mounted instance to [`MountState::Unmounting`] and return it.
    ///
    /// Pending and already unmounting entries answer `NotMounted`, so only
    /// one teardown runs per instance and an unfinished mount is never torn
    /// down from outside.
    pub fn begin_unmount(&self, device: DeviceId) -> MountResult<Arc<SuperBlock>> {
        let mut entry = self
            .mounts
            .get_mut(&device)
            .ok_or(MountError::NotMounted { device })?;
        if entry.state != MountState::Mounted {
            debug!(%device, state = ?entry.state, "not in a mounted state");
            return Err(MountError::NotMounted { device });
        }
        entry.state = MountState::Unmounting;
        Ok(entry.sb.clone())
    }

    /// Drop the entry for `sb`'s device if it still belongs to `sb`.
    pub fn remove(&self, sb: &Arc<SuperBlock>) -> bool {
        self.mounts
            .remove_if(&sb.device_id(), |_, e| Arc::ptr_eq(&e.sb, sb))
            .is_some()
    }

    /// Number of bound devices, in any state.
    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    /// True when no device is bound.
    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Identities of every bound device, sorted.
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.mounts.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }
}

/// A registry reservation for a mount still in progress.
#[derive(Debug)]
pub struct Binding<'a> {
    registry: &'a MountRegistry,
    sb: Arc<SuperBlock>,
    committed: bool,
}

impl Binding<'_> {
    /// Superblock reserved by this binding.
    pub fn superblock(&self) -> &Arc<SuperBlock> {
        &self.sb
    }

    /// Keep the reservation: the mount succeeded.
    pub fn commit(mut self) -> Arc<SuperBlock> {
        if let Some(mut entry) = self.registry.mounts.get_mut(&self.sb.device_id()) {
            if Arc::ptr_eq(&entry.sb, &self.sb) {
                entry.state = MountState::Mounted;
            }
        }
        self.committed = true;
        self.sb.clone()
    }
}

impl Drop for Binding<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let device = self.sb.device_id();
            self.registry
                .mounts
                .remove_if(&device, |_, e| Arc::ptr_eq(&e.sb, &self.sb) && e.state == MountState::Pending);
            self.sb.shutdown();
            debug!(%device, "binding rolled back");
        }
    }
}
