//! Software emulation of the host side of QRPC.
//!
//! [`SimDevice`] plays the part of the emulator behind a block device's
//! control region so the transport and mount paths can be exercised without
//! a hypervisor. It records every command it receives and counts open
//! references so tests can check that devices are given back.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::device::{
    AccessMode, BlockDevice, DeviceHandle, DeviceId, DeviceProvider, CONTROL_REGION_SIZE, FRAME_OFFSET,
    QRPC_SIGNATURE, SIGNATURE_OFFSET,
};
use crate::error::{Result, TransportError};
use crate::frame::{Command, Frame, Status, FRAME_SIZE, PAYLOAD_SIZE};

static DEVICE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Major number the simulator hands out device identities under.
const SIM_MAJOR: u64 = 254;

/// Custom remote-side handler: fills the reply payload and picks the status.
pub type Responder = Arc<dyn Fn(Command, &mut [u8; PAYLOAD_SIZE]) -> Status + Send + Sync>;

/// How the emulated remote side answers commands.
#[derive(Clone)]
pub enum SimBehavior {
    /// Reply OK with an empty payload
    Accept,
    /// Reply ERROR, payload untouched
    Reject,
    /// Never complete
    Silent,
    /// Delegate to a handler
    Custom(Responder),
}

impl fmt::Debug for SimBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimBehavior::Accept => write!(f, "Accept"),
            SimBehavior::Reject => write!(f, "Reject"),
            SimBehavior::Silent => write!(f, "Silent"),
            SimBehavior::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// In-memory block device with an emulated QRPC endpoint.
pub struct SimDevice {
    id: DeviceId,
    name: String,
    read_only: bool,
    region: Mutex<Vec<u8>>,
    behavior: Mutex<SimBehavior>,
    completion: Notify,
    commands: Mutex<Vec<Command>>,
    open_count: AtomicUsize,
}

impl SimDevice {
    fn create(name: &str, behavior: SimBehavior, qrpc: bool, read_only: bool) -> Arc<Self> {
        let minor = DEVICE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut region = vec![0u8; CONTROL_REGION_SIZE];
        if qrpc {
            let at = SIGNATURE_OFFSET as usize;
            region[at..at + QRPC_SIGNATURE.len()].copy_from_slice(&QRPC_SIGNATURE);
        }
        Arc::new(Self {
            id: DeviceId((SIM_MAJOR << 20) | minor),
            name: name.to_string(),
            read_only,
            region: Mutex::new(region),
            behavior: Mutex::new(behavior),
            completion: Notify::new(),
            commands: Mutex::new(Vec::new()),
            open_count: AtomicUsize::new(0),
        })
    }

    /// QRPC-capable device answering with `behavior`.
    pub fn new(name: &str, behavior: SimBehavior) -> Arc<Self> {
        Self::create(name, behavior, true, false)
    }

    /// QRPC-capable device answering through `responder`.
    pub fn with_responder<F>(name: &str, responder: F) -> Arc<Self>
    where
        F: Fn(Command, &mut [u8; PAYLOAD_SIZE]) -> Status + Send + Sync + 'static,
    {
        Self::create(name, SimBehavior::Custom(Arc::new(responder)), true, false)
    }

    /// QRPC-capable device on read-only media: write opens fail.
    pub fn read_only(name: &str, behavior: SimBehavior) -> Arc<Self> {
        Self::create(name, behavior, true, true)
    }

    /// Ordinary block device without a QRPC signature.
    pub fn foreign(name: &str) -> Arc<Self> {
        Self::create(name, SimBehavior::Accept, false, false)
    }

    /// Change how later commands are answered.
    pub fn set_behavior(&self, behavior: SimBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Commands received so far, in arrival order.
    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().clone()
    }

    /// Number of outstanding open references.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Open a reference to this device with `mode`.
    pub fn open_handle(self: &Arc<Self>, mode: AccessMode) -> Result<DeviceHandle> {
        if self.read_only && mode.contains(AccessMode::WRITE) {
            return Err(TransportError::DeviceOpen {
                name: self.name.clone(),
                reason: "read-only media".to_string(),
            });
        }
        self.open_count.fetch_add(1, Ordering::SeqCst);
        trace!(device = %self.name, opens = self.open_count(), "opened");
        Ok(DeviceHandle::new(self.clone(), mode))
    }

    fn window(&self, offset: u64, len: usize) -> Result<std::ops::Range<usize>> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= CONTROL_REGION_SIZE => Ok(start..end),
            _ => Err(TransportError::Device {
                device: self.name.clone(),
                reason: format!("window {}+{} outside control region", offset, len),
            }),
        }
    }

    fn respond(&self, frame: &mut Frame) -> bool {
        let behavior = self.behavior.lock().clone();
        match behavior {
            SimBehavior::Accept => {
                frame.payload = [0u8; PAYLOAD_SIZE];
                frame.status = Status::Ok;
            }
            SimBehavior::Reject => frame.status = Status::Error,
            SimBehavior::Silent => return false,
            SimBehavior::Custom(responder) => {
                frame.status = responder(frame.command, &mut frame.payload);
            }
        }
        true
    }
}

impl fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("read_only", &self.read_only)
            .field("open_count", &self.open_count())
            .finish()
    }
}

#[async_trait]
impl BlockDevice for SimDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn read_window(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let range = self.window(offset, buf.len())?;
        buf.copy_from_slice(&self.region.lock()[range]);
        Ok(())
    }

    async fn write_window(&self, offset: u64, data: &[u8]) -> Result<()> {
        let range = self.window(offset, data.len())?;
        self.region.lock()[range].copy_from_slice(data);
        Ok(())
    }

    async fn signal_pending(&self) -> Result<()> {
        let start = FRAME_OFFSET as usize;
        let mut frame = {
            let region = self.region.lock();
            Frame::decode(&region[start..start + FRAME_SIZE])?
        };
        self.commands.lock().push(frame.command);

        if !self.respond(&mut frame) {
            debug!(device = %self.name, command = ?frame.command, "holding command");
            return Ok(());
        }
        self.region.lock()[start..start + FRAME_SIZE].copy_from_slice(&frame.encode());
        self.completion.notify_one();
        Ok(())
    }

    async fn wait_complete(&self) -> Result<()> {
        self.completion.notified().await;
        Ok(())
    }

    fn release(&self, _mode: AccessMode) {
        let _ = self
            .open_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Name-indexed set of simulated devices.
#[derive(Default)]
pub struct SimProvider {
    devices: Mutex<HashMap<String, Arc<SimDevice>>>,
}

impl SimProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `device` under its own name.
    pub fn add(&self, device: Arc<SimDevice>) {
        let name = device.name.clone();
        self.devices.lock().insert(name, device);
    }

    /// Register `device` under an additional name, e.g. a by-id symlink.
    pub fn alias(&self, name: &str, device: Arc<SimDevice>) {
        self.devices.lock().insert(name.to_string(), device);
    }

    /// Device registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<SimDevice>> {
        self.devices.lock().get(name).cloned()
    }
}

#[async_trait]
impl DeviceProvider for SimProvider {
    async fn open(&self, name: &str, mode: AccessMode) -> Result<DeviceHandle> {
        let device = self.get(name).ok_or_else(|| TransportError::DeviceOpen {
            name: name.to_string(),
            reason: "no such device".to_string(),
        })?;
        device.open_handle(mode)
    }
}
