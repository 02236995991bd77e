//! Mount orchestration.
//!
//! A mount opens the device, checks that it speaks QRPC, binds the device in
//! the registry (charging an instance state only if it is free), builds the
//! root directory and finally tells the remote side about the new filesystem. Each step returns
//! a typed error; everything acquired before the failing step is released by
//! the guards that own it.

use std::sync::Arc;

use async_trait::async_trait;
use qfs_transport::{validate, AccessMode, Command, DeviceId, DeviceProvider, Frame, QrpcTransport};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{MountError, MountResult};
use crate::fs_type::FileSystemType;
use crate::inode::{FileType, Inode, InodeId, ROOT_INO};
use crate::ops::{QFS_FILE_OPS, QFS_INODE_OPS};
use crate::options::MountOptions;
use crate::registry::MountRegistry;
use crate::statfs::{statfs, StatFs};
use crate::superblock::SuperBlock;

/// Counted reference to the root entry of a mounted instance.
#[derive(Debug, Clone)]
pub struct RootHandle {
    sb: Arc<SuperBlock>,
    root: Arc<Inode>,
}

impl RootHandle {
    /// Inode number of the root, always [`ROOT_INO`].
    pub fn ino(&self) -> InodeId {
        self.root.ino()
    }

    /// The root inode.
    pub fn inode(&self) -> &Arc<Inode> {
        &self.root
    }

    /// Superblock of the instance the root belongs to.
    pub fn superblock(&self) -> &Arc<SuperBlock> {
        &self.sb
    }

    /// Identity of the backing device.
    pub fn device_id(&self) -> DeviceId {
        self.sb.device_id()
    }
}

/// The QFS filesystem type.
#[derive(Debug)]
pub struct QfsFileSystem {
    config: ClientConfig,
    registry: MountRegistry,
}

impl QfsFileSystem {
    /// Registered filesystem type name.
    pub const NAME: &'static str = "qfs";

    /// Create the filesystem type with an empty registry sized from `config`.
    pub fn new(config: ClientConfig) -> Self {
        let registry = MountRegistry::new(config.max_instances);
        Self { config, registry }
    }

    /// Client settings.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Registry of bound devices.
    pub fn registry(&self) -> &MountRegistry {
        &self.registry
    }

    /// Mount `dev_name` and return a reference to its root directory.
    pub async fn mount(
        &self,
        provider: &dyn DeviceProvider,
        dev_name: &str,
        options: &MountOptions,
    ) -> MountResult<RootHandle> {
        let mode = AccessMode::for_mount(options.ro);
        let handle = provider.open(dev_name, mode).await.map_err(|source| {
            warn!(device = dev_name, error = %source, "cannot open device");
            MountError::DeviceOpenFailed {
                name: dev_name.to_string(),
                source,
            }
        })?;
        let device = handle.id();
        debug!(device = dev_name, %device, ?mode, "device opened");

        if !validate(handle.device().as_ref()).await {
            warn!(device = dev_name, "not a QRPC block device");
            return Err(MountError::NotQrpcDevice {
                name: dev_name.to_string(),
            });
        }

        let transport = QrpcTransport::new(handle, self.config.transport.clone());
        let binding = self
            .registry
            .bind(device, move |info| SuperBlock::new(transport, options.clone(), info))
            .inspect_err(|e| warn!(device = dev_name, %device, error = %e, "cannot bind device"))?;
        let sb = binding.superblock().clone();

        let mut new = Inode::new_locked(ROOT_INO);
        new.set_file_type(FileType::Directory)
            .set_ops(&QFS_INODE_OPS, &QFS_FILE_OPS);
        let root = new.unlock();
        if sb.set_root(root.clone()).is_err() {
            error!(device = dev_name, %device, "fresh superblock already has a root");
            return Err(MountError::AlreadyMounted { device });
        }

        let transport = sb.transport().ok_or(MountError::NotMounted { device })?;
        let reply = transport
            .transfer(Frame::request(Command::Mount), options.timeout())
            .await?;
        drop(transport);
        if !reply.status.is_ok() {
            warn!(device = dev_name, %device, "remote rejected mount");
            return Err(MountError::RemoteMountRejected {
                name: dev_name.to_string(),
            });
        }

        let sb = binding.commit();
        info!(device = dev_name, %device, ro = options.ro, "qfs mounted");
        Ok(RootHandle { sb, root })
    }

    /// Tear down the instance backed by `device`.
    ///
    /// The remote side is told with a best-effort UNMOUNT; a rejection or
    /// timeout is logged and the device is released regardless. A mount that
    /// has not completed yet answers `NotMounted`, as does a second teardown
    /// racing the first. The device stays bound until the handshake is over.
    pub async fn unmount(&self, device: DeviceId) -> MountResult<()> {
        let sb = self.registry.begin_unmount(device)?;
        let Some(transport) = sb.shutdown() else {
            self.registry.remove(&sb);
            return Err(MountError::NotMounted { device });
        };

        match transport.call(Command::Unmount, &[], sb.options().timeout()).await {
            Ok(reply) if reply.status.is_ok() => debug!(%device, "remote acknowledged unmount"),
            Ok(_) => warn!(%device, "remote rejected unmount"),
            Err(e) => warn!(%device, error = %e, "unmount handshake failed"),
        }
        drop(transport);

        self.registry.remove(&sb);
        info!(device = sb.device_name(), %device, "qfs unmounted");
        Ok(())
    }

    /// Space usage for the instance `root` belongs to.
    pub fn statfs(&self, root: &RootHandle) -> MountResult<StatFs> {
        let sb = root.superblock();
        if !sb.is_active() {
            return Err(MountError::NotMounted {
                device: sb.device_id(),
            });
        }
        Ok(statfs(sb))
    }
}

#[async_trait]
impl FileSystemType for QfsFileSystem {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn mount(
        &self,
        provider: &dyn DeviceProvider,
        dev_name: &str,
        options: &MountOptions,
    ) -> MountResult<RootHandle> {
        QfsFileSystem::mount(self, provider, dev_name, options).await
    }

    async fn kill_sb(&self, device: DeviceId) -> MountResult<()> {
        self.unmount(device).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::MountState;
    use crate::superblock::QFS_MAGIC;
    use qfs_transport::{BlockDevice, SimBehavior, SimDevice, SimProvider, Status};

    fn setup(behavior: SimBehavior) -> (QfsFileSystem, SimProvider, Arc<SimDevice>) {
        let provider = SimProvider::new();
        let device = SimDevice::new("/dev/vdb", behavior);
        provider.add(device.clone());
        (QfsFileSystem::new(ClientConfig::default()), provider, device)
    }

    #[tokio::test]
    async fn test_mount_success() {
        let (fs, provider, device) = setup(SimBehavior::Accept);
        let root = fs.mount(&provider, "/dev/vdb", &MountOptions::default()).await.unwrap();

        assert_eq!(root.ino(), ROOT_INO);
        assert!(root.inode().is_dir());
        assert_eq!(root.superblock().block_size(), 2048);
        assert_eq!(root.superblock().block_size_bits(), 11);
        assert_eq!(root.superblock().magic(), QFS_MAGIC);
        assert_eq!(device.commands(), vec![Command::Mount]);
        assert_eq!(device.open_count(), 1);
        assert_eq!(fs.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_root_handle_clone_shares_root() {
        let (fs, provider, _device) = setup(SimBehavior::Accept);
        let root = fs.mount(&provider, "/dev/vdb", &MountOptions::default()).await.unwrap();
        let again = root.clone();
        assert!(Arc::ptr_eq(root.inode(), again.inode()));
        assert!(Arc::ptr_eq(
            root.inode(),
            root.superblock().root().unwrap()
        ));
    }

    #[tokio::test]
    async fn test_open_failure() {
        let (fs, provider, _device) = setup(SimBehavior::Accept);
        let err = fs
            .mount(&provider, "/dev/missing", &MountOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::DeviceOpenFailed { .. }));
        assert_eq!(fs.registry().allocated(), 0);
    }

    #[tokio::test]
    async fn test_read_only_mount_on_read_only_media() {
        let provider = SimProvider::new();
        let device = SimDevice::read_only("/dev/sr0", SimBehavior::Accept);
        provider.add(device.clone());
        let fs = QfsFileSystem::new(ClientConfig::default());

        let err = fs
            .mount(&provider, "/dev/sr0", &MountOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::DeviceOpenFailed { .. }));

        let root = fs.mount(&provider, "/dev/sr0", &MountOptions::read_only()).await.unwrap();
        assert!(root.superblock().options().ro);
    }

    #[tokio::test]
    async fn test_foreign_device_is_rejected_early() {
        let provider = SimProvider::new();
        let device = SimDevice::foreign("/dev/sda");
        provider.add(device.clone());
        let fs = QfsFileSystem::new(ClientConfig::default());

        let err = fs
            .mount(&provider, "/dev/sda", &MountOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, MountError::NotQrpcDevice { name } if name == "/dev/sda"));
        assert!(device.commands().is_empty());
        assert_eq!(fs.registry().peak_allocated(), 0);
        assert!(fs.registry().is_empty());
        assert_eq!(device.open_count(), 0);
    }

    #[tokio::test]
    async fn test_allocation_failure_releases_device() {
        let provider = SimProvider::new();
        let a = SimDevice::new("/dev/vda", SimBehavior::Accept);
        let b = SimDevice::new("/dev/vdb", SimBehavior::Accept);
        provider.add(a.clone());
        provider.add(b.clone());
        let fs = QfsFileSystem::new(ClientConfig {
            max_instances: 1,
            ..ClientConfig::default()
        });

        fs.mount(&provider, "/dev/vda", &MountOptions::default()).await.unwrap();
        let err = fs
            .mount(&provider, "/dev/vdb", &MountOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, MountError::AllocationFailed { .. }));
        assert_eq!(b.open_count(), 0);
        assert!(b.commands().is_empty());
    }

    #[tokio::test]
    async fn test_second_mount_at_instance_limit_is_already_mounted() {
        let provider = SimProvider::new();
        let device = SimDevice::new("/dev/vdb", SimBehavior::Accept);
        provider.add(device.clone());
        let fs = QfsFileSystem::new(ClientConfig {
            max_instances: 1,
            ..ClientConfig::default()
        });

        fs.mount(&provider, "/dev/vdb", &MountOptions::default()).await.unwrap();
        let err = fs
            .mount(&provider, "/dev/vdb", &MountOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, MountError::AlreadyMounted { device: d } if d == device.id()));
        assert_eq!(fs.registry().peak_allocated(), 1);
        assert_eq!(device.open_count(), 1);
        assert_eq!(device.commands(), vec![Command::Mount]);
    }

    #[tokio::test]
    async fn test_remote_rejection_rolls_back() {
        let (fs, provider, device) = setup(SimBehavior::Reject);
        let err = fs
            .mount(&provider, "/dev/vdb", &MountOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, MountError::RemoteMountRejected { .. }));
        assert_eq!(device.open_count(), 0);
        assert!(fs.registry().is_empty());
        assert_eq!(fs.registry().allocated(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_times_out() {
        let (fs, provider, device) = setup(SimBehavior::Silent);
        let opts = MountOptions {
            timeout_ms: Some(500),
            ..MountOptions::default()
        };
        let err = fs.mount(&provider, "/dev/vdb", &opts).await.unwrap_err();

        assert!(matches!(err, MountError::TransferTimeout { timeout_ms: 500 }));
        assert_eq!(device.open_count(), 0);
        assert!(fs.registry().is_empty());
    }

    #[tokio::test]
    async fn test_unmount_sends_unmount_and_releases() {
        let (fs, provider, device) = setup(SimBehavior::Accept);
        let root = fs.mount(&provider, "/dev/vdb", &MountOptions::default()).await.unwrap();

        fs.unmount(root.device_id()).await.unwrap();

        assert_eq!(device.commands(), vec![Command::Mount, Command::Unmount]);
        assert_eq!(device.open_count(), 0);
        assert!(fs.registry().is_empty());
        assert!(!root.superblock().is_active());
        assert!(matches!(fs.statfs(&root), Err(MountError::NotMounted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_completes_when_remote_is_silent() {
        let (fs, provider, device) = setup(SimBehavior::Accept);
        let opts = MountOptions {
            timeout_ms: Some(100),
            ..MountOptions::default()
        };
        let root = fs.mount(&provider, "/dev/vdb", &opts).await.unwrap();
        device.set_behavior(SimBehavior::Silent);

        fs.unmount(root.device_id()).await.unwrap();
        assert_eq!(device.open_count(), 0);
        assert!(fs.registry().is_empty());
    }

    async fn wait_for_commands(device: &SimDevice, n: usize) {
        while device.commands().len() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_of_pending_mount_is_refused() {
        let provider = Arc::new(SimProvider::new());
        let device = SimDevice::new("/dev/vdb", SimBehavior::Silent);
        provider.add(device.clone());
        let fs = Arc::new(QfsFileSystem::new(ClientConfig::default()));

        let pending = {
            let fs = fs.clone();
            let provider = provider.clone();
            tokio::spawn(async move {
                let opts = MountOptions {
                    timeout_ms: Some(100),
                    ..MountOptions::default()
                };
                fs.mount(&*provider, "/dev/vdb", &opts).await
            })
        };
        wait_for_commands(&device, 1).await;
        assert_eq!(fs.registry().state(device.id()), Some(MountState::Pending));

        let err = fs.unmount(device.id()).await.unwrap_err();
        assert!(matches!(err, MountError::NotMounted { .. }));

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, MountError::TransferTimeout { timeout_ms: 100 }));
        assert!(fs.registry().is_empty());
        assert_eq!(device.open_count(), 0);

        device.set_behavior(SimBehavior::Accept);
        let opts = MountOptions {
            timeout_ms: Some(50),
            ..MountOptions::default()
        };
        let root = fs.mount(&*provider, "/dev/vdb", &opts).await.unwrap();
        assert_eq!(root.ino(), ROOT_INO);
        assert_eq!(device.commands(), vec![Command::Mount, Command::Mount]);
        assert_eq!(device.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_stays_bound_while_unmount_is_outstanding() {
        let provider = Arc::new(SimProvider::new());
        let device = SimDevice::new("/dev/vdb", SimBehavior::Accept);
        provider.add(device.clone());
        let fs = Arc::new(QfsFileSystem::new(ClientConfig::default()));
        let opts = MountOptions {
            timeout_ms: Some(100),
            ..MountOptions::default()
        };
        fs.mount(&*provider, "/dev/vdb", &opts).await.unwrap();
        device.set_behavior(SimBehavior::Silent);

        let teardown = {
            let fs = fs.clone();
            let id = device.id();
            tokio::spawn(async move { fs.unmount(id).await })
        };
        wait_for_commands(&device, 2).await;
        assert_eq!(fs.registry().state(device.id()), Some(MountState::Unmounting));

        let err = fs.mount(&*provider, "/dev/vdb", &opts).await.unwrap_err();
        assert!(matches!(err, MountError::AlreadyMounted { .. }));
        let err = fs.unmount(device.id()).await.unwrap_err();
        assert!(matches!(err, MountError::NotMounted { .. }));

        teardown.await.unwrap().unwrap();
        assert!(fs.registry().is_empty());
        assert_eq!(device.open_count(), 0);
        assert_eq!(device.commands(), vec![Command::Mount, Command::Unmount]);
    }

    #[tokio::test]
    async fn test_unmount_unknown_device() {
        let fs = QfsFileSystem::new(ClientConfig::default());
        let err = fs.unmount(DeviceId(42)).await.unwrap_err();
        assert!(matches!(err, MountError::NotMounted { device } if device == DeviceId(42)));
    }

    #[tokio::test]
    async fn test_statfs_constants() {
        let (fs, provider, _device) = setup(SimBehavior::Accept);
        let root = fs.mount(&provider, "/dev/vdb", &MountOptions::default()).await.unwrap();
        let st = fs.statfs(&root).unwrap();

        assert_eq!(st.f_type, QFS_MAGIC);
        assert_eq!(st.f_bsize, 2048);
        assert_eq!(st.f_namelen, 255);
        assert_eq!(st.f_blocks, 1);
        assert_eq!(st.f_bfree, 0);
        assert_eq!(st.f_bavail, 0);
    }

    #[tokio::test]
    async fn test_custom_responder_sees_mount() {
        let provider = SimProvider::new();
        let device = SimDevice::with_responder("/dev/vdc", |command, _| match command {
            Command::Mount => Status::Ok,
            _ => Status::Error,
        });
        provider.add(device.clone());
        let fs = QfsFileSystem::new(ClientConfig::default());
        let opts = MountOptions {
            timeout_ms: Some(Duration::from_secs(1).as_millis() as u64),
            ..MountOptions::default()
        };
        assert!(fs.mount(&provider, "/dev/vdc", &opts).await.is_ok());
    }
}
