//! Operation-shaped binding over a lock-based host port.
//!
//! [`StreamBinding`] exposes the contract generic serial consumers expect
//! (open, close, read into a buffer slice, write, control lines, drain) and
//! implements it on top of a [`HostPort`]'s readable and writable sides. Each
//! read and each write takes the relevant host lock for the duration of one
//! low-level call and releases it on every exit path.
//!
//! All methods take `&self`. A consumer that needs to close while a read is
//! outstanding shares the binding (for example through an `Arc`) and calls
//! [`Binding::close`] from another task; the read then settles with
//! [`BindingError::ReadCancelled`] before `close` returns.

use crate::error::{BindingError, BindingResult};
use crate::host::{CancelHandle, HostPort, HostSerial, ReadChunk};
use crate::options::{BaudRate, OpenOptions, PortSignals, SetSignals, UpdateOptions};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// The binding contract.
#[async_trait]
pub trait Binding: Send + Sync {
    /// What identifies the port to open.
    type Path: Send;

    /// Open the port. Fails if the binding is not closed.
    async fn open(&self, path: Self::Path, options: OpenOptions) -> BindingResult<()>;

    /// Close the port, cancelling any in-flight read first.
    ///
    /// If the host refuses to close, or this future is dropped before the
    /// host close ran, the binding stays open and `close` can be retried.
    async fn close(&self) -> BindingResult<()>;

    /// Read into `buffer[offset..offset + length]`, returning the number of
    /// bytes copied.
    ///
    /// `Ok(0)` for a non-empty range means the host ended the stream. A
    /// zero `length` returns `Ok(0)` at once without touching the host, so
    /// callers that pass an empty range must not take that as end of stream.
    async fn read(&self, buffer: &mut [u8], offset: usize, length: usize)
        -> BindingResult<usize>;

    /// Write the whole buffer. Writes must not overlap.
    async fn write(&self, buffer: &[u8]) -> BindingResult<()>;

    /// Change options on an open port.
    async fn update(&self, options: UpdateOptions) -> BindingResult<()>;

    /// Drive the outbound control lines.
    async fn set(&self, signals: SetSignals) -> BindingResult<()>;

    /// Read the inbound control lines.
    async fn get(&self) -> BindingResult<PortSignals>;

    async fn get_baud_rate(&self) -> BindingResult<BaudRate>;

    /// Discard buffered data.
    async fn flush(&self) -> BindingResult<()>;

    /// Wait for the in-flight write, if any, to settle.
    async fn drain(&self) -> BindingResult<()>;

    fn is_open(&self) -> bool;
}

/// Lifecycle of a binding instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Closed,
    Opening,
    Open,
    Closing,
}

/// A port found by [`StreamBinding::list`].
#[derive(Debug, Clone)]
pub struct PortListing {
    /// Handle to pass to [`Binding::open`].
    pub port: Arc<dyn HostPort>,
    pub name: String,
    /// USB vendor id as four lowercase hex digits.
    pub vendor_id: Option<String>,
    /// USB product id as four lowercase hex digits.
    pub product_id: Option<String>,
}

fn format_usb_id(id: u16) -> String {
    format!("{id:04x}")
}

/// Resolves once the matching [`Settling`] is dropped.
#[derive(Debug, Clone)]
struct Settled(watch::Receiver<()>);

impl Settled {
    async fn wait(mut self) {
        // Nothing is ever sent; `changed` returns once the sender is gone.
        let _ = self.0.changed().await;
    }
}

#[derive(Debug)]
struct Settling(#[allow(dead_code)] watch::Sender<()>);

fn settle_pair() -> (Settling, Settled) {
    let (tx, rx) = watch::channel(());
    (Settling(tx), Settled(rx))
}

/// Everything that exists only while the port is open.
#[derive(Debug)]
struct Session {
    port: Arc<dyn HostPort>,
    options: OpenOptions,
    /// Cancelled when close begins.
    closing: CancelHandle,
}

#[derive(Debug)]
struct PendingRead {
    /// Cancels the active low-level read, once one has been issued.
    cancel: Option<CancelHandle>,
    settled: Settled,
}

#[derive(Debug)]
struct PendingWrite {
    settled: Settled,
}

#[derive(Debug, Default)]
struct BindingState {
    lifecycle: Lifecycle,
    session: Option<Session>,
    read: Option<PendingRead>,
    write: Option<PendingWrite>,
    /// Bytes from the last chunk that did not fit the caller's buffer.
    unread: Vec<u8>,
}

impl BindingState {
    fn open_session(&self) -> BindingResult<&Session> {
        match (&self.lifecycle, &self.session) {
            (Lifecycle::Open, Some(session)) => Ok(session),
            _ => Err(BindingError::NotOpen),
        }
    }

    /// Move the front of the remainder into `dest`.
    fn take_unread(&mut self, dest: &mut [u8]) -> usize {
        let n = self.unread.len().min(dest.len());
        dest[..n].copy_from_slice(&self.unread[..n]);
        self.unread.drain(..n);
        n
    }
}

enum ReadStep {
    /// Another read is in flight; wait for it and look again.
    Wait(Settled),
    /// Served without touching the host.
    Ready(usize),
    /// Issue one low-level read.
    Issue(Arc<dyn HostPort>, Settling),
}

/// Binding adapter that takes host locks per operation.
///
/// # Example
/// ```
/// use serial_binding::binding::{Binding, StreamBinding};
/// use serial_binding::host::{HostPort, MockHostPort};
/// use serial_binding::options::OpenOptions;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mock = MockHostPort::new("MOCK0");
/// let binding = StreamBinding::new();
/// binding
///     .open(Arc::new(mock.clone()), OpenOptions::with_baud_rate(115200))
///     .await?;
///
/// mock.enqueue_chunk(b"Hello");
/// let mut buffer = [0u8; 8];
/// let n = binding.read(&mut buffer, 0, 3).await?;
/// assert_eq!(&buffer[..n], b"Hel");
/// let n = binding.read(&mut buffer, 0, 8).await?;
/// assert_eq!(&buffer[..n], b"lo");
///
/// binding.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct StreamBinding {
    state: Mutex<BindingState>,
}

impl StreamBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    /// Enumerate host ports, annotating USB identifiers where reported.
    pub async fn list<H>(host: &H) -> BindingResult<Vec<PortListing>>
    where
        H: HostSerial + ?Sized,
    {
        let ports = host.get_ports().await?;
        Ok(ports
            .into_iter()
            .map(|port| {
                let info = port.info();
                PortListing {
                    name: port.name().to_string(),
                    vendor_id: info.usb_vendor_id.map(format_usb_id),
                    product_id: info.usb_product_id.map(format_usb_id),
                    port,
                }
            })
            .collect())
    }

    /// Undo `Closing`: the host port is still open, so the session stays
    /// and gets a fresh close signal.
    fn reopen_after_failed_close(&self) {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Closing {
            return;
        }
        if let Some(session) = state.session.as_mut() {
            session.closing = CancelHandle::new();
            state.lifecycle = Lifecycle::Open;
        } else {
            state.lifecycle = Lifecycle::Closed;
        }
    }

    fn open_port(&self) -> BindingResult<Arc<dyn HostPort>> {
        let state = self.state.lock();
        Ok(Arc::clone(&state.open_session()?.port))
    }

    /// One low-level read into `dest`, with the read lock held only for the
    /// call itself.
    async fn read_from_host(&self, port: &dyn HostPort, dest: &mut [u8]) -> BindingResult<usize> {
        let mut reader = port.readable()?;
        {
            let mut state = self.state.lock();
            let cancel = reader.cancel_handle();
            if state.lifecycle != Lifecycle::Open {
                // Close started before the cancel handle could be recorded.
                cancel.cancel();
            }
            if let Some(pending) = state.read.as_mut() {
                pending.cancel = Some(cancel);
            }
        }

        let result = loop {
            match reader.read().await {
                // An empty chunk is "no data yet", not end of stream.
                Ok(ReadChunk::Data(chunk)) if chunk.is_empty() => continue,
                other => break other,
            }
        };
        drop(reader);

        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Open {
            debug!("Read on {} settled as cancelled", port.name());
            return Err(BindingError::ReadCancelled);
        }

        match result? {
            ReadChunk::Data(mut chunk) => {
                let n = chunk.len().min(dest.len());
                dest[..n].copy_from_slice(&chunk[..n]);
                state.unread = chunk.split_off(n);
                Ok(n)
            }
            ReadChunk::Done => {
                debug!("Readable side of {} ended", port.name());
                Ok(0)
            }
        }
    }
}

/// Returns the binding to Open if a close stops before the host closed.
struct CloseGuard<'a> {
    binding: &'a StreamBinding,
    armed: bool,
}

impl Drop for CloseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.binding.reopen_after_failed_close();
        }
    }
}

/// Clears the pending read entry, then signals settlement.
struct ReadGuard<'a> {
    binding: &'a StreamBinding,
    _settling: Settling,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.binding.state.lock().read = None;
    }
}

/// Clears the pending write entry, then signals settlement.
struct WriteGuard<'a> {
    binding: &'a StreamBinding,
    _settling: Settling,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.binding.state.lock().write = None;
    }
}

#[async_trait]
impl Binding for StreamBinding {
    type Path = Arc<dyn HostPort>;

    async fn open(&self, path: Self::Path, options: OpenOptions) -> BindingResult<()> {
        let host_options = {
            let mut state = self.state.lock();
            if state.lifecycle != Lifecycle::Closed {
                return Err(BindingError::AlreadyOpen);
            }
            let host_options = options.to_host()?;
            state.lifecycle = Lifecycle::Opening;
            host_options
        };

        if let Err(e) = path.open(&host_options).await {
            warn!("Failed to open {}: {}", path.name(), e);
            self.state.lock().lifecycle = Lifecycle::Closed;
            return Err(e.into());
        }

        info!("Opened {} at {} baud", path.name(), options.baud_rate);
        let mut state = self.state.lock();
        state.unread.clear();
        state.session = Some(Session {
            port: path,
            options,
            closing: CancelHandle::new(),
        });
        state.lifecycle = Lifecycle::Open;
        Ok(())
    }

    async fn close(&self) -> BindingResult<()> {
        let (port, read, write) = {
            let mut state = self.state.lock();
            let session = state.open_session()?;
            session.closing.cancel();
            let port = Arc::clone(&session.port);

            let read = state.read.as_ref().map(|pending| {
                if let Some(cancel) = &pending.cancel {
                    cancel.cancel();
                }
                pending.settled.clone()
            });
            let write = state.write.as_ref().map(|pending| pending.settled.clone());
            state.lifecycle = Lifecycle::Closing;
            (port, read, write)
        };
        let mut guard = CloseGuard {
            binding: self,
            armed: true,
        };

        if let Some(read) = read {
            debug!("Waiting for cancelled read on {}", port.name());
            read.wait().await;
        }
        if let Some(write) = write {
            debug!("Waiting for cancelled write on {}", port.name());
            write.wait().await;
        }

        if let Err(e) = port.close().await {
            // The guard puts the binding back to Open.
            warn!("Host failed to close {}: {}", port.name(), e);
            return Err(e.into());
        }

        guard.armed = false;
        {
            let mut state = self.state.lock();
            state.session = None;
            state.unread.clear();
            state.lifecycle = Lifecycle::Closed;
        }
        info!("Closed {}", port.name());
        Ok(())
    }

    async fn read(
        &self,
        buffer: &mut [u8],
        offset: usize,
        length: usize,
    ) -> BindingResult<usize> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= buffer.len())
            .ok_or(BindingError::InvalidRange {
                offset,
                length,
                capacity: buffer.len(),
            })?;
        let dest = &mut buffer[offset..end];

        loop {
            let step = {
                let mut state = self.state.lock();
                if state.lifecycle != Lifecycle::Open {
                    return Err(BindingError::ReadCancelled);
                }
                if let Some(pending) = &state.read {
                    ReadStep::Wait(pending.settled.clone())
                } else if !state.unread.is_empty() || dest.is_empty() {
                    ReadStep::Ready(state.take_unread(dest))
                } else {
                    let port = Arc::clone(&state.open_session()?.port);
                    let (settling, settled) = settle_pair();
                    state.read = Some(PendingRead {
                        cancel: None,
                        settled,
                    });
                    ReadStep::Issue(port, settling)
                }
            };

            match step {
                ReadStep::Wait(settled) => settled.wait().await,
                ReadStep::Ready(n) => return Ok(n),
                ReadStep::Issue(port, settling) => {
                    let _guard = ReadGuard {
                        binding: self,
                        _settling: settling,
                    };
                    return self.read_from_host(port.as_ref(), dest).await;
                }
            }
        }
    }

    async fn write(&self, buffer: &[u8]) -> BindingResult<()> {
        let (port, closing, settling) = {
            let mut state = self.state.lock();
            if state.write.is_some() {
                return Err(BindingError::OverlappingWrite);
            }
            let session = state.open_session()?;
            let port = Arc::clone(&session.port);
            let closing = session.closing.clone();
            let (settling, settled) = settle_pair();
            state.write = Some(PendingWrite { settled });
            (port, closing, settling)
        };
        let _guard = WriteGuard {
            binding: self,
            _settling: settling,
        };

        let mut writer = port.writable()?;
        let outcome = tokio::select! {
            result = writer.write(buffer) => Some(result),
            _ = closing.cancelled() => None,
        };
        drop(writer);

        match outcome {
            Some(result) => {
                result?;
                if closing.is_cancelled() {
                    return Err(BindingError::WriteCancelled);
                }
                Ok(())
            }
            None => {
                debug!("Write on {} cancelled by close", port.name());
                Err(BindingError::WriteCancelled)
            }
        }
    }

    async fn update(&self, _options: UpdateOptions) -> BindingResult<()> {
        Err(BindingError::UpdateNotSupported)
    }

    async fn set(&self, signals: SetSignals) -> BindingResult<()> {
        let port = self.open_port()?;
        port.set_signals(&signals.into()).await?;
        Ok(())
    }

    async fn get(&self) -> BindingResult<PortSignals> {
        let port = self.open_port()?;
        Ok(port.get_signals().await?.into())
    }

    async fn get_baud_rate(&self) -> BindingResult<BaudRate> {
        let state = self.state.lock();
        Ok(BaudRate {
            baud_rate: state.open_session()?.options.baud_rate,
        })
    }

    async fn flush(&self) -> BindingResult<()> {
        // The host exposes no way to discard buffered data; this is a no-op.
        self.open_port()?;
        debug!("flush requested, nothing to do");
        Ok(())
    }

    async fn drain(&self) -> BindingResult<()> {
        let pending = {
            let state = self.state.lock();
            state.open_session()?;
            state.write.as_ref().map(|pending| pending.settled.clone())
        };
        if let Some(settled) = pending {
            settled.wait().await;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lifecycle() == Lifecycle::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_usb_id() {
        assert_eq!(format_usb_id(10), "000a");
        assert_eq!(format_usb_id(0x2341), "2341");
        assert_eq!(format_usb_id(0xFFFF), "ffff");
    }

    #[test]
    fn test_take_unread_is_fifo() {
        let mut state = BindingState {
            unread: b"abcdef".to_vec(),
            ..Default::default()
        };

        let mut dest = [0u8; 4];
        assert_eq!(state.take_unread(&mut dest), 4);
        assert_eq!(&dest, b"abcd");
        assert_eq!(state.unread, b"ef");

        assert_eq!(state.take_unread(&mut dest), 2);
        assert_eq!(&dest[..2], b"ef");
        assert!(state.unread.is_empty());
    }

    #[test]
    fn test_new_binding_is_closed() {
        let binding = StreamBinding::new();
        assert_eq!(binding.lifecycle(), Lifecycle::Closed);
        assert!(!binding.is_open());
    }

    #[tokio::test]
    async fn test_settled_resolves_when_settling_drops() {
        let (settling, settled) = settle_pair();
        let waiter = tokio::spawn(settled.clone().wait());
        drop(settling);
        waiter.await.unwrap();
        // Already settled: resolves immediately.
        settled.wait().await;
    }
}
