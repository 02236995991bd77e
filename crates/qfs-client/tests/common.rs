//! Common test utilities and fixtures for integration tests.

use std::sync::Arc;

use qfs_client::{ClientConfig, QfsFileSystem};
use qfs_transport::{SimBehavior, SimDevice, SimProvider};

/// A QFS instance with a set of simulated devices behind one provider.
pub struct TestHost {
    pub fs: Arc<QfsFileSystem>,
    pub provider: Arc<SimProvider>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            fs: Arc::new(QfsFileSystem::new(config)),
            provider: Arc::new(SimProvider::new()),
        }
    }

    /// Attach a QRPC device answering with `behavior`.
    pub fn attach(&self, name: &str, behavior: SimBehavior) -> Arc<SimDevice> {
        let device = SimDevice::new(name, behavior);
        self.provider.add(device.clone());
        device
    }
}
