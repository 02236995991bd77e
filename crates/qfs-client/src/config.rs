use std::path::Path;

use qfs_transport::TransportConfig;
use serde::{Deserialize, Serialize};

/// Client-wide settings shared by every mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Transport settings applied to every device.
    pub transport: TransportConfig,
    /// Upper bound on concurrently mounted instances.
    pub max_instances: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            max_instances: 64,
        }
    }
}

impl ClientConfig {
    /// Load from a `.toml` or `.json` file, picked by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
