//! Native host transport over OS serial ports.
//!
//! Wraps the `serialport` crate behind the lock-based host contract so the
//! binding and duplex adapters can drive real hardware. Blocking device calls
//! run on tokio's blocking pool. Reads poll with a short device timeout so a
//! cancelled read gives its thread back promptly.

use super::error::{HostError, HostResult};
use super::{
    CancelHandle, FlowControl, HostInputSignals, HostOpenOptions, HostOutputSignals, HostPort,
    HostPortInfo, HostReader, HostSerial, HostWriter, LockSlot, Parity, ReadChunk, StreamLock,
    StreamPair,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

type Device = Box<dyn serialport::SerialPort>;

/// Tuning for native ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeSettings {
    /// Device timeout used between cancellation checks.
    pub poll_interval: Duration,
    /// Largest chunk a single low-level read returns.
    pub read_chunk_size: usize,
}

impl Default for NativeSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            read_chunk_size: 4096,
        }
    }
}

/// Enumerates OS serial ports.
#[derive(Debug, Clone, Default)]
pub struct NativeSerial {
    settings: NativeSettings,
}

impl NativeSerial {
    pub fn new(settings: NativeSettings) -> Self {
        Self { settings }
    }

    /// Create a handle for a port path without enumerating.
    pub fn port(&self, name: impl Into<String>) -> NativePort {
        NativePort::new(name, HostPortInfo::default(), self.settings)
    }
}

#[async_trait]
impl HostSerial for NativeSerial {
    async fn get_ports(&self) -> HostResult<Vec<Arc<dyn HostPort>>> {
        let found = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(|e| HostError::Io(std::io::Error::other(e)))??;

        Ok(found
            .into_iter()
            .map(|port| {
                let info = match &port.port_type {
                    serialport::SerialPortType::UsbPort(usb) => HostPortInfo {
                        usb_vendor_id: Some(usb.vid),
                        usb_product_id: Some(usb.pid),
                    },
                    _ => HostPortInfo::default(),
                };
                Arc::new(NativePort::new(port.port_name, info, self.settings)) as Arc<dyn HostPort>
            })
            .collect())
    }
}

/// An OS serial port handle.
pub struct NativePort {
    name: String,
    info: HostPortInfo,
    settings: NativeSettings,
    device: Mutex<Option<Device>>,
    read_slot: LockSlot,
    write_slot: LockSlot,
    reads: Arc<InFlight>,
    writes: Arc<InFlight>,
}

impl NativePort {
    pub fn new(name: impl Into<String>, info: HostPortInfo, settings: NativeSettings) -> Self {
        Self {
            name: name.into(),
            info,
            settings,
            device: Mutex::new(None),
            read_slot: LockSlot::new(),
            write_slot: LockSlot::new(),
            reads: Arc::default(),
            writes: Arc::default(),
        }
    }

    fn ensure_unlocked(&self) -> HostResult<()> {
        if self.read_slot.is_locked() || self.write_slot.is_locked() {
            return Err(HostError::invalid_state("cannot close a locked stream"));
        }
        Ok(())
    }

    fn clone_device(&self) -> HostResult<Device> {
        let device = self.device.lock();
        let device = device
            .as_ref()
            .ok_or_else(|| HostError::invalid_state("port is not open"))?;
        Ok(device.try_clone()?)
    }
}

fn convert_data_bits(bits: u8) -> HostResult<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(HostError::invalid_options(format!(
            "data bits must be between 5 and 8, got {other}"
        ))),
    }
}

fn convert_stop_bits(bits: u8) -> HostResult<serialport::StopBits> {
    match bits {
        1 => Ok(serialport::StopBits::One),
        2 => Ok(serialport::StopBits::Two),
        other => Err(HostError::invalid_options(format!(
            "stop bits must be 1 or 2, got {other}"
        ))),
    }
}

fn convert_parity(parity: Parity) -> HostResult<serialport::Parity> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Mark | Parity::Space => Err(HostError::invalid_options(format!(
            "parity '{parity}' is not supported by the OS driver"
        ))),
    }
}

fn convert_flow_control(flow: FlowControl) -> serialport::FlowControl {
    match flow {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
    }
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

/// Blocking device calls still running for one side of a port.
///
/// A reader or writer dropped mid-call releases its stream lock at once, but
/// its device call keeps running on the blocking pool until it notices the
/// cancellation. The next call on that side and `close` wait for it here.
#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard(Arc::clone(self))
    }

    fn is_idle(&self) -> bool {
        *self.count.lock() == 0
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Held by a blocking device call for as long as it runs.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count -= 1;
        if *count == 0 {
            drop(count);
            self.0.idle.notify_waiters();
        }
    }
}

impl StreamPair for NativePort {
    fn readable(&self) -> HostResult<Box<dyn HostReader>> {
        let device = self.clone_device()?;
        let lock = self.read_slot.try_lock("readable")?;
        Ok(Box::new(NativeReader {
            device: Arc::new(Mutex::new(device)),
            cancel: CancelHandle::new(),
            chunk_size: self.settings.read_chunk_size.max(1),
            in_flight: Arc::clone(&self.reads),
            _lock: lock,
        }))
    }

    fn writable(&self) -> HostResult<Box<dyn HostWriter>> {
        let device = self.clone_device()?;
        let lock = self.write_slot.try_lock("writable")?;
        Ok(Box::new(NativeWriter {
            device: Arc::new(Mutex::new(device)),
            cancel: CancelHandle::new(),
            in_flight: Arc::clone(&self.writes),
            _lock: lock,
        }))
    }
}

#[async_trait]
impl HostPort for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> HostPortInfo {
        self.info
    }

    async fn open(&self, options: &HostOpenOptions) -> HostResult<()> {
        if self.device.lock().is_some() {
            return Err(HostError::invalid_state("port is already open"));
        }

        let builder = serialport::new(self.name.as_str(), options.baud_rate)
            .data_bits(convert_data_bits(options.data_bits)?)
            .stop_bits(convert_stop_bits(options.stop_bits)?)
            .parity(convert_parity(options.parity)?)
            .flow_control(convert_flow_control(options.flow_control))
            .timeout(self.settings.poll_interval);

        let name = self.name.clone();
        let device = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| HostError::Io(std::io::Error::other(e)))?
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => HostError::not_found(name),
                serialport::ErrorKind::InvalidInput => HostError::invalid_options(e.to_string()),
                _ => HostError::Serial(e),
            })?;

        debug!("Opened {} at {} baud", self.name, options.baud_rate);
        *self.device.lock() = Some(device);
        Ok(())
    }

    async fn close(&self) -> HostResult<()> {
        self.ensure_unlocked()?;
        if !self.reads.is_idle() || !self.writes.is_idle() {
            debug!("Waiting for abandoned device calls on {}", self.name);
            self.reads.wait_idle().await;
            self.writes.wait_idle().await;
            self.ensure_unlocked()?;
        }
        self.device
            .lock()
            .take()
            .ok_or_else(|| HostError::invalid_state("port is not open"))?;
        debug!("Closed {}", self.name);
        Ok(())
    }

    async fn get_signals(&self) -> HostResult<HostInputSignals> {
        let mut device = self.device.lock();
        let device = device
            .as_mut()
            .ok_or_else(|| HostError::invalid_state("port is not open"))?;
        Ok(HostInputSignals {
            clear_to_send: device.read_clear_to_send()?,
            data_set_ready: device.read_data_set_ready()?,
            data_carrier_detect: device.read_carrier_detect()?,
        })
    }

    async fn set_signals(&self, signals: &HostOutputSignals) -> HostResult<()> {
        let mut device = self.device.lock();
        let device = device
            .as_mut()
            .ok_or_else(|| HostError::invalid_state("port is not open"))?;
        if let Some(dtr) = signals.data_terminal_ready {
            device.write_data_terminal_ready(dtr)?;
        }
        if let Some(rts) = signals.request_to_send {
            device.write_request_to_send(rts)?;
        }
        match signals.break_signal {
            Some(true) => device.set_break()?,
            Some(false) => device.clear_break()?,
            None => {}
        }
        Ok(())
    }
}

impl std::fmt::Debug for NativePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativePort")
            .field("name", &self.name)
            .field("info", &self.info)
            .field("open", &self.device.lock().is_some())
            .finish()
    }
}

struct NativeReader {
    device: Arc<Mutex<Device>>,
    cancel: CancelHandle,
    chunk_size: usize,
    in_flight: Arc<InFlight>,
    _lock: StreamLock,
}

#[async_trait]
impl HostReader for NativeReader {
    async fn read(&mut self) -> HostResult<ReadChunk> {
        // A read abandoned by an earlier reader must finish first, or it
        // could take bytes meant for this one.
        self.in_flight.wait_idle().await;

        let device = Arc::clone(&self.device);
        let cancel = self.cancel.clone();
        let chunk_size = self.chunk_size;
        let in_flight = self.in_flight.enter();

        tokio::task::spawn_blocking(move || {
            let _in_flight = in_flight;
            // Bound after the guard so the device handle closes first.
            let device = device;
            let mut buffer = vec![0u8; chunk_size];
            let mut device = device.lock();
            loop {
                if cancel.is_cancelled() {
                    return Ok(ReadChunk::Done);
                }
                match device.read(&mut buffer) {
                    Ok(0) => continue,
                    Ok(n) => {
                        buffer.truncate(n);
                        return Ok(ReadChunk::Data(buffer));
                    }
                    Err(e) if is_transient(e.kind()) => continue,
                    Err(e) if e.kind() == ErrorKind::BrokenPipe => return Ok(ReadChunk::Done),
                    Err(e) => return Err(HostError::Io(e)),
                }
            }
        })
        .await
        .map_err(|e| HostError::Io(std::io::Error::other(e)))?
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl Drop for NativeReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct NativeWriter {
    device: Arc<Mutex<Device>>,
    cancel: CancelHandle,
    in_flight: Arc<InFlight>,
    _lock: StreamLock,
}

#[async_trait]
impl HostWriter for NativeWriter {
    async fn write(&mut self, data: &[u8]) -> HostResult<()> {
        // Never interleave with the tail of an abandoned write.
        self.in_flight.wait_idle().await;

        let device = Arc::clone(&self.device);
        let cancel = self.cancel.clone();
        let data = data.to_vec();
        let in_flight = self.in_flight.enter();

        tokio::task::spawn_blocking(move || {
            let _in_flight = in_flight;
            let device = device;
            let mut device = device.lock();
            let mut remaining = data.as_slice();
            while !remaining.is_empty() {
                if cancel.is_cancelled() {
                    warn!("Write abandoned with {} bytes unsent", remaining.len());
                    return Err(HostError::Io(std::io::Error::new(
                        ErrorKind::Interrupted,
                        "write abandoned",
                    )));
                }
                match device.write(remaining) {
                    Ok(0) => {
                        return Err(HostError::Io(std::io::Error::new(
                            ErrorKind::WriteZero,
                            "device accepted no bytes",
                        )))
                    }
                    Ok(n) => remaining = &remaining[n..],
                    Err(e) if is_transient(e.kind()) => continue,
                    Err(e) => return Err(HostError::Io(e)),
                }
            }
            device.flush().map_err(HostError::Io)
        })
        .await
        .map_err(|e| HostError::Io(std::io::Error::other(e)))?
    }
}

impl Drop for NativeWriter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_bits_conversion() {
        assert_eq!(convert_data_bits(8).unwrap(), serialport::DataBits::Eight);
        assert_eq!(convert_data_bits(5).unwrap(), serialport::DataBits::Five);
        assert!(matches!(
            convert_data_bits(9),
            Err(HostError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_stop_bits_conversion() {
        assert_eq!(convert_stop_bits(2).unwrap(), serialport::StopBits::Two);
        assert!(convert_stop_bits(3).is_err());
    }

    #[test]
    fn test_parity_conversion() {
        assert_eq!(
            convert_parity(Parity::Even).unwrap(),
            serialport::Parity::Even
        );
        assert!(matches!(
            convert_parity(Parity::Space),
            Err(HostError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_flow_control_conversion() {
        assert_eq!(
            convert_flow_control(FlowControl::Hardware),
            serialport::FlowControl::Hardware
        );
    }

    #[tokio::test]
    async fn test_port_not_found_error() {
        let port = NativeSerial::default().port("/dev/nonexistent_binding_port_12345");
        let result = port
            .open(&HostOpenOptions {
                baud_rate: 9600,
                data_bits: 8,
                stop_bits: 1,
                parity: Parity::None,
                flow_control: FlowControl::None,
            })
            .await;

        assert!(result.is_err());
        assert!(!format!("{port:?}").contains("open: true"));
    }

    #[tokio::test]
    async fn test_in_flight_waits_for_abandoned_call() {
        let gate = Arc::new(InFlight::default());
        assert!(gate.is_idle());

        let call = gate.enter();
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // The blocking thread finishes after its caller has gone away.
        std::thread::spawn(move || drop(call)).join().unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake once the call ends")
            .unwrap();
        assert!(gate.is_idle());
    }

    #[test]
    fn test_in_flight_counts_overlapping_calls() {
        let gate = Arc::new(InFlight::default());
        let first = gate.enter();
        let second = gate.enter();

        drop(first);
        assert!(!gate.is_idle());
        drop(second);
        assert!(gate.is_idle());
        tokio_test::block_on(gate.wait_idle());
    }

    #[test]
    fn test_streams_require_open_port() {
        let port = NativeSerial::default().port("/dev/nonexistent_binding_port_12345");
        assert!(matches!(port.readable(), Err(HostError::InvalidState(_))));
        assert!(matches!(port.writable(), Err(HostError::InvalidState(_))));
    }
}
