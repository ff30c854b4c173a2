// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transport adapter seam.
//!
//! The connection manager never touches sockets directly. It talks to a
//! [`Transport`] that hands out three kinds of resources:
//!
//! ```text
//! Server:                          Client:
//! Transport::bind_listener()       Transport::outbound()
//!   ↓                                ↓
//! ListeningEndpoint::accept()      OutboundSocket::connect()
//!   ↓                                ↓
//! [Channel, PeerAddr]              [Channel]
//! ```
//!
//! Every resource is [`Closeable`]. Closing is idempotent and wakes any
//! operation pending on the resource with an error; this is the only way a
//! blocked accept, connect or read is interrupted.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::service::ServiceRecord;

/// Identity of a remote peer.
pub type PeerAddr = bluer::Address;

/// A resource that can be closed from any task.
pub trait Closeable: Send + Sync {
    /// Close the resource. Idempotent. The underlying handle is released
    /// before this returns, even while an operation is pending on it.
    fn close(&self);

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}

/// A bound endpoint accepting inbound channels.
#[async_trait]
pub trait ListeningEndpoint: Closeable {
    /// Wait for the next inbound channel.
    async fn accept(&self) -> io::Result<(Arc<dyn Channel>, PeerAddr)>;
}

/// A socket created for one outbound attempt.
#[async_trait]
pub trait OutboundSocket: Closeable {
    /// Perform the connect. May only succeed once.
    async fn connect(&self) -> io::Result<Arc<dyn Channel>>;
}

/// An opened bidirectional byte stream.
#[async_trait]
pub trait Channel: Closeable {
    /// Read the next chunk. `Ok(0)` means end of stream.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `bytes`.
    async fn write(&self, bytes: &[u8]) -> io::Result<()>;
}

/// Factory for listening endpoints and outbound sockets.
pub trait Transport: Send + Sync + 'static {
    /// Bind a listening endpoint publishing `service`.
    fn bind_listener(&self, service: &ServiceRecord) -> io::Result<Arc<dyn ListeningEndpoint>>;

    /// Create a socket for connecting to `peer` under `service`.
    fn outbound(&self, peer: PeerAddr, service: &ServiceRecord)
        -> io::Result<Arc<dyn OutboundSocket>>;
}

/// Error returned by operations on a closed resource.
pub fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "resource closed")
}

/// One-shot close flag that wakes waiters.
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Mark closed. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal is closed.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue of incoming items that can be shut from any task.
///
/// The receiver sits behind a lock that is only held while polling, so
/// [`Inbox::close`] can always take it. A pending [`Inbox::recv`] is not
/// woken by that; pair it with the owner's [`CloseSignal`].
pub(crate) struct Inbox<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<T>>>,
}

impl<T> Inbox<T> {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Queue `item`, handing it back if the inbox is closed.
    pub(crate) fn push(&self, item: T) -> Result<(), T> {
        self.tx.send(item).map_err(|err| err.0)
    }

    pub(crate) async fn recv(&self) -> Option<T> {
        poll_fn(|cx| match self.rx.lock().as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        })
        .await
    }

    /// Stop accepting items and return those never received.
    pub(crate) fn close(&self) -> Vec<T> {
        let Some(mut rx) = self.rx.lock().take() else {
            return Vec::new();
        };
        rx.close();
        let mut pending = Vec::new();
        while let Ok(item) = rx.try_recv() {
            pending.push(item);
        }
        pending
    }

    pub(crate) fn is_open(&self) -> bool {
        self.rx.lock().is_some()
    }
}

/// [`Channel`] over any pair of async read/write halves.
///
/// Each half sits behind a lock held only for a single poll, so `close`
/// drops both halves immediately and the remote end sees the link go away.
pub struct StreamChannel<R, W> {
    reader: Mutex<Option<R>>,
    writer: Mutex<Option<W>>,
    write_gate: tokio::sync::Mutex<()>,
    signal: CloseSignal,
}

impl<R, W> StreamChannel<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            write_gate: tokio::sync::Mutex::new(()),
            signal: CloseSignal::new(),
        }
    }

    /// Whether either half is still held.
    pub fn is_attached(&self) -> bool {
        self.reader.lock().is_some() || self.writer.lock().is_some()
    }

    fn poll_read_chunk(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let mut slot = self.reader.lock();
        let Some(reader) = slot.as_mut() else {
            return Poll::Ready(Err(closed_error()));
        };
        let mut read_buf = ReadBuf::new(buf);
        ready!(Pin::new(reader).poll_read(cx, &mut read_buf))?;
        Poll::Ready(Ok(read_buf.filled().len()))
    }

    fn poll_write_all(
        &self,
        cx: &mut Context<'_>,
        bytes: &[u8],
        written: &mut usize,
    ) -> Poll<io::Result<()>> {
        let mut slot = self.writer.lock();
        let Some(writer) = slot.as_mut() else {
            return Poll::Ready(Err(closed_error()));
        };
        while *written < bytes.len() {
            let n = ready!(Pin::new(&mut *writer).poll_write(cx, &bytes[*written..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            *written += n;
        }
        Pin::new(writer).poll_flush(cx)
    }
}

impl<R, W> Closeable for StreamChannel<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn close(&self) {
        if self.signal.close() {
            debug!("Channel closed");
        }
        self.reader.lock().take();
        self.writer.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }
}

#[async_trait]
impl<R, W> Channel for StreamChannel<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        tokio::select! {
            biased;
            _ = self.signal.closed() => Err(closed_error()),
            res = poll_fn(|cx| self.poll_read_chunk(cx, &mut *buf)) => res,
        }
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        // One writer at a time so chunks never interleave.
        let _gate = tokio::select! {
            biased;
            _ = self.signal.closed() => return Err(closed_error()),
            gate = self.write_gate.lock() => gate,
        };

        let mut written = 0;
        tokio::select! {
            biased;
            _ = self.signal.closed() => Err(closed_error()),
            res = poll_fn(|cx| self.poll_write_all(cx, bytes, &mut written)) => res,
        }
    }
}
