//! Blocking call/response over a device control region.
//!
//! The control region is a single shared register block, so a transport
//! serializes every call behind one async mutex: write the frame, signal the
//! device, wait for completion, read the full frame back. No request IDs, no
//! pipelining.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::device::{BlockDevice, DeviceHandle, DeviceId, FRAME_OFFSET, QRPC_SIGNATURE, SIGNATURE_OFFSET};
use crate::error::{Result, TransportError};
use crate::frame::{Command, Frame, Status, FRAME_SIZE};

/// Check whether `device` speaks QRPC by probing its signature register.
///
/// A read failure counts as "not a QRPC device"; the caller decides whether
/// that is fatal.
pub async fn validate(device: &dyn BlockDevice) -> bool {
    let mut signature = [0u8; 4];
    match device.read_window(SIGNATURE_OFFSET, &mut signature).await {
        Ok(()) if signature == QRPC_SIGNATURE => true,
        Ok(()) => {
            debug!(
                device = device.name(),
                expected = ?QRPC_SIGNATURE,
                actual = ?signature,
                "signature mismatch"
            );
            false
        }
        Err(e) => {
            debug!(device = device.name(), error = %e, "signature probe failed");
            false
        }
    }
}

/// Where the last command on a device stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Nothing sent yet
    Idle,
    /// Signalled but never completed, e.g. after a timeout
    Pending(Command),
    /// The remote side wrote a terminal status
    Completed {
        /// Command that completed.
        command: Command,
        /// Status written by the remote side.
        status: Status,
    },
}

/// QRPC endpoint bound to one open device.
///
/// Owns the [`DeviceHandle`]; dropping the transport releases the device.
#[derive(Debug)]
pub struct QrpcTransport {
    handle: DeviceHandle,
    config: TransportConfig,
    call_lock: AsyncMutex<()>,
    state: Mutex<TransferState>,
}

impl QrpcTransport {
    /// Bind a transport to an open device.
    pub fn new(handle: DeviceHandle, config: TransportConfig) -> Self {
        Self {
            handle,
            config,
            call_lock: AsyncMutex::new(()),
            state: Mutex::new(TransferState::Idle),
        }
    }

    /// Identity of the bound device.
    pub fn device_id(&self) -> DeviceId {
        self.handle.id()
    }

    /// Name of the bound device.
    pub fn device_name(&self) -> &str {
        self.handle.name()
    }

    /// The owned device handle.
    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    /// Transport settings.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// State of the most recent command.
    pub fn state(&self) -> TransferState {
        *self.state.lock()
    }

    /// Send `frame` and wait for the remote side to complete it.
    ///
    /// `timeout` overrides the configured default; with neither set the call
    /// waits for as long as the device takes. On timeout the state stays
    /// [`TransferState::Pending`].
    pub async fn transfer(&self, frame: Frame, timeout: Option<Duration>) -> Result<Frame> {
        let timeout = timeout.or_else(|| self.config.default_timeout());
        let command = frame.command;
        let _call = self.call_lock.lock().await;
        let device = self.handle.device();

        device.write_window(FRAME_OFFSET, &frame.encode()).await?;
        device.signal_pending().await?;
        *self.state.lock() = TransferState::Pending(command);
        debug!(device = device.name(), ?command, ?timeout, "command pending");

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, device.wait_complete()).await {
                Ok(done) => done?,
                Err(_) => {
                    warn!(device = device.name(), ?command, ?limit, "device did not complete");
                    return Err(TransportError::Timeout {
                        command,
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => device.wait_complete().await?,
        }

        let mut buf = [0u8; FRAME_SIZE];
        device.read_window(FRAME_OFFSET, &mut buf).await?;
        let reply = Frame::decode(&buf)?;
        if reply.command != command {
            return Err(TransportError::InvalidFrame {
                reason: format!("reply for {:?} to a {:?} request", reply.command, command),
            });
        }

        *self.state.lock() = TransferState::Completed {
            command,
            status: reply.status,
        };
        debug!(device = device.name(), ?command, status = ?reply.status, "command completed");
        Ok(reply)
    }

    /// Build a request for `command` carrying `payload` and transfer it.
    pub async fn call(&self, command: Command, payload: &[u8], timeout: Option<Duration>) -> Result<Frame> {
        let frame = Frame::with_payload(command, payload)?;
        self.transfer(frame, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::AccessMode;
    use crate::sim::{SimBehavior, SimDevice};

    fn open(device: &Arc<SimDevice>) -> DeviceHandle {
        device.open_handle(AccessMode::for_mount(false)).unwrap()
    }

    #[tokio::test]
    async fn test_validate_qrpc_device() {
        let device = SimDevice::new("qrpc0", SimBehavior::Accept);
        assert!(validate(&*device).await);
    }

    #[tokio::test]
    async fn test_validate_foreign_device() {
        let device = SimDevice::foreign("sda");
        assert!(!validate(&*device).await);
        assert!(device.commands().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_ok_overwrites_sentinel() {
        let device = SimDevice::new("qrpc0", SimBehavior::Accept);
        let transport = QrpcTransport::new(open(&device), TransportConfig::default());

        let request = Frame::request(Command::Mount);
        assert_eq!(request.status, Status::Error);
        let reply = transport.transfer(request, None).await.unwrap();

        assert_eq!(reply.status, Status::Ok);
        assert_eq!(reply.command, Command::Mount);
        assert_eq!(
            transport.state(),
            TransferState::Completed {
                command: Command::Mount,
                status: Status::Ok
            }
        );
    }

    #[tokio::test]
    async fn test_transfer_error_status_is_returned() {
        let device = SimDevice::new("qrpc0", SimBehavior::Reject);
        let transport = QrpcTransport::new(open(&device), TransportConfig::default());
        let reply = transport.call(Command::Mount, &[], None).await.unwrap();
        assert_eq!(reply.status, Status::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_times_out_on_silent_device() {
        let device = SimDevice::new("qrpc0", SimBehavior::Silent);
        let transport = QrpcTransport::new(open(&device), TransportConfig::default());

        let err = transport
            .call(Command::Mount, &[], Some(Duration::from_millis(200)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransportError::Timeout {
                command: Command::Mount,
                timeout_ms: 200
            }
        ));
        assert_eq!(transport.state(), TransferState::Pending(Command::Mount));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_default_timeout() {
        let device = SimDevice::new("qrpc0", SimBehavior::Silent);
        let config = TransportConfig::with_timeout(Duration::from_secs(2));
        let transport = QrpcTransport::new(open(&device), config);
        let err = transport.call(Command::Init, &[], None).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { timeout_ms: 2000, .. }));
    }

    #[tokio::test]
    async fn test_reply_payload_copied_back() {
        let device = SimDevice::with_responder("qrpc0", |command, payload| {
            payload[..4].copy_from_slice(&(command.as_u8() as u32 + 40).to_le_bytes());
            Status::Ok
        });
        let transport = QrpcTransport::new(open(&device), TransportConfig::default());
        let reply = transport.call(Command::Unmount, b"xyz", None).await.unwrap();
        assert_eq!(&reply.payload[..4], &42u32.to_le_bytes());
    }

    #[tokio::test]
    async fn test_payload_does_not_leak_between_commands() {
        let device = SimDevice::with_responder("qrpc0", |_, _| Status::Ok);
        let transport = QrpcTransport::new(open(&device), TransportConfig::default());

        transport.call(Command::Init, &[0xFF; 16], None).await.unwrap();
        let reply = transport.call(Command::Mount, &[], None).await.unwrap();
        assert!(reply.payload.iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_serialized() {
        let device = SimDevice::new("qrpc0", SimBehavior::Accept);
        let transport = Arc::new(QrpcTransport::new(open(&device), TransportConfig::default()));

        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let transport = transport.clone();
            tasks.push(tokio::spawn(async move {
                let command = if i % 2 == 0 { Command::Init } else { Command::Mount };
                transport.call(command, &[i], None).await.map(|r| r.command == command)
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().unwrap());
        }
        assert_eq!(device.commands().len(), 8);
    }

    #[tokio::test]
    async fn test_drop_releases_device() {
        let device = SimDevice::new("qrpc0", SimBehavior::Accept);
        let transport = QrpcTransport::new(open(&device), TransportConfig::default());
        assert_eq!(device.open_count(), 1);
        drop(transport);
        assert_eq!(device.open_count(), 0);
    }
}
