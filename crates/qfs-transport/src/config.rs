use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transport tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Deadline applied to transfers that do not pass their own.
    /// `None` waits for the device indefinitely.
    pub default_timeout_ms: Option<u64>,
}

impl TransportConfig {
    /// Config with a default deadline of `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout_ms: Some(timeout.as_millis() as u64),
        }
    }

    /// The default deadline, if any.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}
