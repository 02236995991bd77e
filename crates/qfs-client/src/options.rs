//! Mount option parsing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MountError;

/// Options for a single mount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOptions {
    /// Read-only mount: the device is opened without write access.
    pub ro: bool,
    /// Deadline for handshake transfers, overriding the transport default.
    pub timeout_ms: Option<u64>,
}

impl MountOptions {
    /// Options for a read-only mount.
    pub fn read_only() -> Self {
        Self {
            ro: true,
            ..Self::default()
        }
    }

    /// Handshake deadline, if one was given.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Parse mount options from a comma-separated string.
///
/// Valid options: ro, rw, timeout_ms=N.
pub fn parse_mount_options(opts_str: &str) -> Result<MountOptions, MountError> {
    let mut options = MountOptions::default();

    for opt in opts_str.split(',') {
        let opt = opt.trim();
        match opt.split_once('=') {
            Some(("timeout_ms", value)) => {
                let ms = value
                    .parse::<u64>()
                    .map_err(|_| MountError::InvalidOption(opt.to_string()))?;
                options.timeout_ms = Some(ms);
            }
            Some(_) => return Err(MountError::InvalidOption(opt.to_string())),
            None => match opt {
                "ro" => options.ro = true,
                "rw" => options.ro = false,
                "" => {}
                _ => return Err(MountError::InvalidOption(opt.to_string())),
            },
        }
    }

    Ok(options)
}
