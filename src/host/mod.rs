//! Host transport contract.
//!
//! A host transport is whatever the execution environment provides for
//! talking to serial hardware: a browser serial capability, the OS serial
//! driver, or an in-memory mock. The adapters in [`crate::binding`] and
//! [`crate::duplex`] only ever see the traits defined here.
//!
//! The model is lock based. A port exposes a readable side and a writable
//! side; each side hands out at most one reader or writer at a time, and the
//! lock is released when that reader or writer is dropped.

pub mod error;
pub mod mock;
pub mod native;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub use error::{HostError, HostResult};
pub use mock::{MockHostPort, MockSerial};
pub use native::{NativePort, NativeSerial};

/// Parity checking modes.
///
/// This is the union of what callers may ask for. Browser transports only
/// understand `None`, `Even` and `Odd` and reject the rest at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Even => "even",
            Self::Odd => "odd",
            Self::Mark => "mark",
            Self::Space => "space",
        };
        f.write_str(name)
    }
}

/// Flow control modes a host transport understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Hardware,
}

/// Options passed to [`HostPort::open`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOpenOptions {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

/// Outbound control lines. `None` leaves a line unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostOutputSignals {
    pub data_terminal_ready: Option<bool>,
    pub request_to_send: Option<bool>,
    pub break_signal: Option<bool>,
}

/// Inbound control lines as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostInputSignals {
    pub clear_to_send: bool,
    pub data_set_ready: bool,
    pub data_carrier_detect: bool,
}

/// Identification the host reports for a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostPortInfo {
    pub usb_vendor_id: Option<u16>,
    pub usb_product_id: Option<u16>,
}

/// Result of one low-level read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadChunk {
    /// Bytes delivered by the host. May be empty.
    Data(Vec<u8>),
    /// The readable side ended, either because the port went away or
    /// because the read was cancelled.
    Done,
}

/// Cancellation handle for an active low-level read.
///
/// Cloning shares the same flag. Cancelling wakes every task waiting in
/// [`CancelHandle::cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// The lock slot of one stream side (readable or writable).
#[derive(Debug, Clone, Default)]
pub struct LockSlot {
    locked: Arc<AtomicBool>,
}

impl LockSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, failing with [`HostError::Locked`] if it is held.
    pub fn try_lock(&self, side: &'static str) -> HostResult<StreamLock> {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| HostError::Locked(side))?;
        Ok(StreamLock {
            locked: Arc::clone(&self.locked),
        })
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

/// A held stream lock. Dropping it releases the slot.
#[derive(Debug)]
pub struct StreamLock {
    locked: Arc<AtomicBool>,
}

impl Drop for StreamLock {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// A locked reader on a port's readable side.
#[async_trait]
pub trait HostReader: Send {
    /// Perform one low-level read.
    ///
    /// Resolves with [`ReadChunk::Done`] once the stream has ended or the
    /// read has been cancelled through [`cancel_handle`](Self::cancel_handle).
    async fn read(&mut self) -> HostResult<ReadChunk>;

    /// Handle that cancels a pending [`read`](Self::read) from elsewhere.
    fn cancel_handle(&self) -> CancelHandle;
}

/// A locked writer on a port's writable side.
#[async_trait]
pub trait HostWriter: Send {
    /// Write the whole buffer.
    async fn write(&mut self, data: &[u8]) -> HostResult<()>;
}

/// The capability set both adapters are built on: a readable source and a
/// writable sink, each lockable by a single user.
pub trait StreamPair: Send + Sync {
    /// Lock the readable side.
    fn readable(&self) -> HostResult<Box<dyn HostReader>>;

    /// Lock the writable side.
    fn writable(&self) -> HostResult<Box<dyn HostWriter>>;
}

/// A host serial port handle.
#[async_trait]
pub trait HostPort: StreamPair + fmt::Debug {
    /// Human readable identifier, used for logging.
    fn name(&self) -> &str;

    fn info(&self) -> HostPortInfo;

    async fn open(&self, options: &HostOpenOptions) -> HostResult<()>;

    async fn close(&self) -> HostResult<()>;

    /// Read the inbound control lines.
    async fn get_signals(&self) -> HostResult<HostInputSignals> {
        Err(HostError::Unsupported("get_signals"))
    }

    /// Drive the outbound control lines.
    async fn set_signals(&self, _signals: &HostOutputSignals) -> HostResult<()> {
        Err(HostError::Unsupported("set_signals"))
    }
}

/// Port enumeration provided by the host.
#[async_trait]
pub trait HostSerial: Send + Sync {
    async fn get_ports(&self) -> HostResult<Vec<Arc<dyn HostPort>>>;
}
