//! Mock host transport for testing.
//!
//! Provides a `MockHostPort` that behaves like a browser serial port without
//! requiring hardware or a browser. Chunks are scripted per read, writes can
//! be held open to exercise overlapping and draining behavior, and lock state
//! is observable so tests can check that every lock is released.

use super::error::{HostError, HostResult};
use super::{
    CancelHandle, FlowControl, HostInputSignals, HostOpenOptions, HostOutputSignals, HostPort,
    HostPortInfo, HostReader, HostSerial, HostWriter, LockSlot, Parity, ReadChunk, StreamLock,
    StreamPair,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// Inner state of the mock port, shared between clones.
#[derive(Debug, Default)]
struct MockPortState {
    open: bool,
    /// Chunks handed out by subsequent low-level reads.
    read_queue: VecDeque<ReadChunk>,
    /// Set once a `Done` chunk has been delivered.
    ended: bool,
    /// Every buffer that reached the writable side.
    write_log: Vec<Vec<u8>>,
    /// Options of every open call that reached the host.
    open_log: Vec<HostOpenOptions>,
    close_calls: usize,
    read_calls: usize,
    fail_next_open: Option<String>,
    fail_next_close: Option<String>,
    fail_next_read: Option<String>,
    fail_next_write: Option<String>,
    /// While set, writes wait until `release_writes` is called.
    writes_held: bool,
    signals_supported: bool,
    input_signals: HostInputSignals,
    output_signals: HostOutputSignals,
}

/// Mock host serial port.
///
/// Clones share state, so a test can keep one handle for scripting and
/// inspection while the adapter under test owns another.
///
/// # Example
/// ```
/// use serial_binding::host::{MockHostPort, StreamPair, HostPort, HostOpenOptions, ReadChunk};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let port = MockHostPort::new("MOCK0");
/// port.open(&HostOpenOptions {
///     baud_rate: 9600,
///     data_bits: 8,
///     stop_bits: 1,
///     parity: Default::default(),
///     flow_control: Default::default(),
/// })
/// .await?;
///
/// port.enqueue_chunk(b"Hello");
/// let mut reader = port.readable()?;
/// assert_eq!(reader.read().await?, ReadChunk::Data(b"Hello".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MockHostPort {
    name: String,
    info: HostPortInfo,
    state: Arc<Mutex<MockPortState>>,
    data_ready: Arc<Notify>,
    write_gate: Arc<Notify>,
    read_slot: LockSlot,
    write_slot: LockSlot,
}

impl MockHostPort {
    /// Create a new mock port with signal control enabled.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            info: HostPortInfo::default(),
            state: Arc::new(Mutex::new(MockPortState {
                signals_supported: true,
                ..Default::default()
            })),
            data_ready: Arc::new(Notify::new()),
            write_gate: Arc::new(Notify::new()),
            read_slot: LockSlot::new(),
            write_slot: LockSlot::new(),
        }
    }

    /// Report the given USB identifiers from `info()`.
    pub fn with_usb_ids(mut self, vendor_id: Option<u16>, product_id: Option<u16>) -> Self {
        self.info = HostPortInfo {
            usb_vendor_id: vendor_id,
            usb_product_id: product_id,
        };
        self
    }

    /// Make signal calls fail with `Unsupported`, like a host without
    /// control-line access.
    pub fn without_signals(self) -> Self {
        self.state.lock().signals_supported = false;
        self
    }

    /// Queue a chunk for a later low-level read.
    pub fn enqueue_chunk(&self, data: &[u8]) {
        self.state
            .lock()
            .read_queue
            .push_back(ReadChunk::Data(data.to_vec()));
        self.data_ready.notify_one();
    }

    /// End the readable side once the queued chunks are consumed.
    pub fn end_stream(&self) {
        self.state.lock().read_queue.push_back(ReadChunk::Done);
        self.data_ready.notify_one();
    }

    /// Fail the next open call with an I/O error.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        self.state.lock().fail_next_open = Some(message.into());
    }

    /// Fail the next close call with an I/O error, leaving the port open.
    pub fn fail_next_close(&self, message: impl Into<String>) {
        self.state.lock().fail_next_close = Some(message.into());
    }

    /// Fail the next (or the currently pending) low-level read.
    pub fn fail_next_read(&self, message: impl Into<String>) {
        self.state.lock().fail_next_read = Some(message.into());
        self.data_ready.notify_one();
    }

    /// Fail the next low-level write.
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.state.lock().fail_next_write = Some(message.into());
    }

    /// Hold all writes until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        self.state.lock().writes_held = true;
    }

    pub fn release_writes(&self) {
        self.state.lock().writes_held = false;
        self.write_gate.notify_waiters();
    }

    pub fn set_input_signals(&self, signals: HostInputSignals) {
        self.state.lock().input_signals = signals;
    }

    /// Outbound control lines as last driven through `set_signals`.
    pub fn output_signals(&self) -> HostOutputSignals {
        self.state.lock().output_signals
    }

    /// Get a copy of all data written to the port.
    pub fn write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Options of every open call that reached the host.
    pub fn open_log(&self) -> Vec<HostOpenOptions> {
        self.state.lock().open_log.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Number of low-level reads issued against the readable side.
    pub fn read_calls(&self) -> usize {
        self.state.lock().read_calls
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn readable_locked(&self) -> bool {
        self.read_slot.is_locked()
    }

    pub fn writable_locked(&self) -> bool {
        self.write_slot.is_locked()
    }
}

/// Reject what a browser serial transport would reject.
fn validate(options: &HostOpenOptions) -> HostResult<()> {
    if options.baud_rate == 0 {
        return Err(HostError::invalid_options("baudRate must be greater than 0"));
    }
    if !matches!(options.data_bits, 7 | 8) {
        return Err(HostError::invalid_options(format!(
            "dataBits must be 7 or 8, got {}",
            options.data_bits
        )));
    }
    if !matches!(options.stop_bits, 1 | 2) {
        return Err(HostError::invalid_options(format!(
            "stopBits must be 1 or 2, got {}",
            options.stop_bits
        )));
    }
    if matches!(options.parity, Parity::Mark | Parity::Space) {
        return Err(HostError::invalid_options(format!(
            "parity '{}' is not supported",
            options.parity
        )));
    }
    debug_assert!(matches!(
        options.flow_control,
        FlowControl::None | FlowControl::Hardware
    ));
    Ok(())
}

impl StreamPair for MockHostPort {
    fn readable(&self) -> HostResult<Box<dyn HostReader>> {
        if !self.state.lock().open {
            return Err(HostError::invalid_state("port is not open"));
        }
        let lock = self.read_slot.try_lock("readable")?;
        Ok(Box::new(MockReader {
            state: Arc::clone(&self.state),
            data_ready: Arc::clone(&self.data_ready),
            cancel: CancelHandle::new(),
            _lock: lock,
        }))
    }

    fn writable(&self) -> HostResult<Box<dyn HostWriter>> {
        if !self.state.lock().open {
            return Err(HostError::invalid_state("port is not open"));
        }
        let lock = self.write_slot.try_lock("writable")?;
        Ok(Box::new(MockWriter {
            state: Arc::clone(&self.state),
            write_gate: Arc::clone(&self.write_gate),
            _lock: lock,
        }))
    }
}

#[async_trait]
impl HostPort for MockHostPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> HostPortInfo {
        self.info
    }

    async fn open(&self, options: &HostOpenOptions) -> HostResult<()> {
        let mut state = self.state.lock();
        state.open_log.push(options.clone());

        if state.open {
            return Err(HostError::invalid_state("port is already open"));
        }
        if let Some(message) = state.fail_next_open.take() {
            return Err(HostError::Io(std::io::Error::other(message)));
        }
        validate(options)?;

        state.open = true;
        state.ended = false;
        Ok(())
    }

    async fn close(&self) -> HostResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(HostError::invalid_state("port is not open"));
        }
        if self.read_slot.is_locked() || self.write_slot.is_locked() {
            return Err(HostError::invalid_state("cannot close a locked stream"));
        }
        if let Some(message) = state.fail_next_close.take() {
            return Err(HostError::Io(std::io::Error::other(message)));
        }
        state.open = false;
        state.close_calls += 1;
        Ok(())
    }

    async fn get_signals(&self) -> HostResult<HostInputSignals> {
        let state = self.state.lock();
        if !state.signals_supported {
            return Err(HostError::Unsupported("signals"));
        }
        if !state.open {
            return Err(HostError::invalid_state("port is not open"));
        }
        Ok(state.input_signals)
    }

    async fn set_signals(&self, signals: &HostOutputSignals) -> HostResult<()> {
        let mut state = self.state.lock();
        if !state.signals_supported {
            return Err(HostError::Unsupported("signals"));
        }
        if !state.open {
            return Err(HostError::invalid_state("port is not open"));
        }
        let current = &mut state.output_signals;
        if signals.data_terminal_ready.is_some() {
            current.data_terminal_ready = signals.data_terminal_ready;
        }
        if signals.request_to_send.is_some() {
            current.request_to_send = signals.request_to_send;
        }
        if signals.break_signal.is_some() {
            current.break_signal = signals.break_signal;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MockHostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHostPort")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("readable_locked", &self.readable_locked())
            .field("writable_locked", &self.writable_locked())
            .finish()
    }
}

struct MockReader {
    state: Arc<Mutex<MockPortState>>,
    data_ready: Arc<Notify>,
    cancel: CancelHandle,
    _lock: StreamLock,
}

#[async_trait]
impl HostReader for MockReader {
    async fn read(&mut self) -> HostResult<ReadChunk> {
        self.state.lock().read_calls += 1;
        let cancel = self.cancel.clone();

        loop {
            if cancel.is_cancelled() {
                return Ok(ReadChunk::Done);
            }
            {
                let mut state = self.state.lock();
                if let Some(message) = state.fail_next_read.take() {
                    return Err(HostError::Io(std::io::Error::other(message)));
                }
                if state.ended || !state.open {
                    return Ok(ReadChunk::Done);
                }
                if let Some(chunk) = state.read_queue.pop_front() {
                    if chunk == ReadChunk::Done {
                        state.ended = true;
                    }
                    return Ok(chunk);
                }
            }

            tokio::select! {
                _ = self.data_ready.notified() => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

struct MockWriter {
    state: Arc<Mutex<MockPortState>>,
    write_gate: Arc<Notify>,
    _lock: StreamLock,
}

#[async_trait]
impl HostWriter for MockWriter {
    async fn write(&mut self, data: &[u8]) -> HostResult<()> {
        loop {
            let released = self.write_gate.notified();
            if !self.state.lock().writes_held {
                break;
            }
            released.await;
        }

        let mut state = self.state.lock();
        if !state.open {
            return Err(HostError::invalid_state("port is not open"));
        }
        if let Some(message) = state.fail_next_write.take() {
            return Err(HostError::Io(std::io::Error::other(message)));
        }
        state.write_log.push(data.to_vec());
        Ok(())
    }
}

/// Mock port enumeration.
#[derive(Debug, Clone, Default)]
pub struct MockSerial {
    ports: Vec<MockHostPort>,
}

impl MockSerial {
    pub fn new(ports: Vec<MockHostPort>) -> Self {
        Self { ports }
    }

    pub fn add_port(&mut self, port: MockHostPort) {
        self.ports.push(port);
    }
}

#[async_trait]
impl HostSerial for MockSerial {
    async fn get_ports(&self) -> HostResult<Vec<Arc<dyn HostPort>>> {
        Ok(self
            .ports
            .iter()
            .cloned()
            .map(|port| Arc::new(port) as Arc<dyn HostPort>)
            .collect())
    }
}
