//! Duplex byte stream over a host port's readable and writable sides.
//!
//! Unlike [`StreamBinding`](crate::binding::StreamBinding), which takes a
//! host lock per operation, a [`DuplexStream`] takes both locks when it is
//! built and holds them until it is closed or dropped. Incoming data is
//! pumped into a bounded channel: the pump only issues the next low-level
//! read once the channel has room, so a slow consumer stalls the reads
//! instead of growing a buffer.

use crate::error::{BindingError, BindingResult};
use crate::host::{HostReader, HostResult, HostWriter, ReadChunk, StreamPair};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Tuning for [`DuplexStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplexSettings {
    /// Chunks buffered ahead of the consumer before reading pauses.
    pub high_water_mark: usize,
}

impl Default for DuplexSettings {
    fn default() -> Self {
        Self {
            high_water_mark: 16,
        }
    }
}

/// Bidirectional byte stream with long-lived host locks.
///
/// Reading is done through the [`Stream`] implementation: each item is one
/// host chunk, the stream ends when the host ends its readable side, and a
/// read failure is yielded once before the stream ends.
///
/// Must be created inside a tokio runtime.
///
/// # Example
/// ```
/// use futures::StreamExt;
/// use serial_binding::duplex::DuplexStream;
/// use serial_binding::host::{HostOpenOptions, HostPort, MockHostPort};
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
/// let mut stream = DuplexStream::new(&port)?;
/// stream.write(b"ping").await?;
///
/// port.enqueue_chunk(b"pong");
/// port.end_stream();
/// assert_eq!(stream.next().await.transpose()?, Some(b"pong".to_vec()));
/// assert!(stream.next().await.is_none());
/// # Ok(())
/// # }
/// ```
pub struct DuplexStream {
    writer: Box<dyn HostWriter>,
    incoming: ReceiverStream<HostResult<Vec<u8>>>,
    pump: JoinHandle<()>,
}

impl DuplexStream {
    /// Lock both sides of an open port with default settings.
    pub fn new<P>(port: &P) -> BindingResult<Self>
    where
        P: StreamPair + ?Sized,
    {
        Self::with_settings(port, DuplexSettings::default())
    }

    pub fn with_settings<P>(port: &P, settings: DuplexSettings) -> BindingResult<Self>
    where
        P: StreamPair + ?Sized,
    {
        let reader = port.readable()?;
        let writer = port.writable()?;

        let (tx, rx) = mpsc::channel(settings.high_water_mark.max(1));
        let pump = tokio::spawn(pump(reader, tx));

        Ok(Self {
            writer,
            incoming: ReceiverStream::new(rx),
            pump,
        })
    }

    /// Write one buffer. A failure fails this write only; the stream stays
    /// usable.
    pub async fn write(&mut self, data: &[u8]) -> BindingResult<()> {
        self.writer.write(data).await.map_err(|e| {
            warn!("Duplex write of {} bytes failed: {}", data.len(), e);
            BindingError::from(e)
        })
    }

    /// Stop reading and release both host locks before returning.
    pub async fn close(mut self) {
        self.pump.abort();
        // A cancelled pump has dropped its reader, and with it the lock.
        let _ = (&mut self.pump).await;
    }
}

async fn pump(mut reader: Box<dyn HostReader>, tx: mpsc::Sender<HostResult<Vec<u8>>>) {
    loop {
        // Wait for room downstream before pulling from the host.
        let Ok(permit) = tx.reserve().await else {
            debug!("Duplex consumer went away, stopping reads");
            return;
        };

        match reader.read().await {
            Ok(ReadChunk::Data(chunk)) if chunk.is_empty() => continue,
            Ok(ReadChunk::Data(chunk)) => permit.send(Ok(chunk)),
            Ok(ReadChunk::Done) => {
                debug!("Duplex readable side ended");
                return;
            }
            Err(e) => {
                warn!("Duplex read failed: {}", e);
                permit.send(Err(e));
                return;
            }
        }
    }
}

impl Stream for DuplexStream {
    type Item = BindingResult<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.incoming)
            .poll_next(cx)
            .map(|item| item.map(|chunk| chunk.map_err(BindingError::from)))
    }
}

impl Drop for DuplexStream {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl std::fmt::Debug for DuplexStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexStream")
            .field("pump_finished", &self.pump.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        assert_eq!(DuplexSettings::default().high_water_mark, 16);
    }
}
