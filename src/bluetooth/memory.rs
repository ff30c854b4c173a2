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

//! In-process loopback transport.
//!
//! Channels are `tokio::io::duplex` pipes. The remote side of every pipe is
//! handed to whoever plays the peer: [`MemoryTransport::dial`] simulates an
//! inbound connection, and peers registered with
//! [`MemoryTransport::add_peer`] receive the far end of outbound connects.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Weak};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::service::ServiceRecord;
use super::transport::{
    closed_error, Channel, CloseSignal, Closeable, Inbox, ListeningEndpoint, OutboundSocket,
    PeerAddr, StreamChannel, Transport,
};

/// Capacity of each duplex pipe.
const PIPE_CAPACITY: usize = 4096;

type MemoryChannel = StreamChannel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;
type Incoming = (Arc<dyn Channel>, PeerAddr);

/// How a registered peer answers outbound connects.
#[derive(Clone)]
enum RemotePeer {
    /// Accepts; the far end of each pipe goes to the inbox.
    Accepting(mpsc::UnboundedSender<DuplexStream>),
    /// Never answers; connect pends until the socket is closed.
    Unresponsive,
}

/// Shared registry. Sockets and channels are tracked weakly so the counters
/// report what is still alive, not what was ever opened.
#[derive(Default)]
struct Hub {
    listeners: HashMap<Uuid, Arc<MemoryListener>>,
    peers: HashMap<PeerAddr, RemotePeer>,
    outbound: Vec<Weak<MemoryOutbound>>,
    channels: Vec<Weak<MemoryChannel>>,
    fail_bind: bool,
}

impl Hub {
    fn open_channel(&mut self) -> (Arc<MemoryChannel>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        let (reader, writer) = tokio::io::split(local);
        let channel = Arc::new(StreamChannel::new(reader, writer));
        self.channels.retain(|weak| live_channel(weak).is_some());
        self.channels.push(Arc::downgrade(&channel));
        (channel, remote)
    }

    fn track_outbound(&mut self, socket: &Arc<MemoryOutbound>) {
        self.outbound.retain(|weak| live_outbound(weak).is_some());
        self.outbound.push(Arc::downgrade(socket));
    }
}

fn live_channel(weak: &Weak<MemoryChannel>) -> Option<Arc<MemoryChannel>> {
    weak.upgrade().filter(|channel| channel.is_attached())
}

fn live_outbound(weak: &Weak<MemoryOutbound>) -> Option<Arc<MemoryOutbound>> {
    weak.upgrade().filter(|socket| !socket.is_closed())
}

/// Loopback transport for tests and demos.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent binds fail.
    pub fn set_bind_failure(&self, fail: bool) {
        self.hub.lock().fail_bind = fail;
    }

    /// Register a peer that accepts outbound connects.
    ///
    /// The returned receiver yields the peer's end of each connection.
    pub fn add_peer(&self, addr: PeerAddr) -> mpsc::UnboundedReceiver<DuplexStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.lock().peers.insert(addr, RemotePeer::Accepting(tx));
        rx
    }

    /// Register a peer whose connects never complete.
    pub fn add_unresponsive_peer(&self, addr: PeerAddr) {
        self.hub.lock().peers.insert(addr, RemotePeer::Unresponsive);
    }

    /// Forget a peer; later connects to it are refused.
    pub fn remove_peer(&self, addr: &PeerAddr) {
        self.hub.lock().peers.remove(addr);
    }

    /// Simulate `from` connecting to the listener publishing `service`.
    ///
    /// Returns the remote end of the new channel.
    pub fn dial(&self, from: PeerAddr, service: &ServiceRecord) -> io::Result<DuplexStream> {
        let mut hub = self.hub.lock();
        let listener = match hub.listeners.get(&service.uuid) {
            Some(listener) if listener.inbox.is_open() => listener.clone(),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("no listener for {}", service),
                ))
            }
        };

        let (channel, remote) = hub.open_channel();
        let channel: Arc<dyn Channel> = channel;
        listener.inbox.push((channel, from)).map_err(|(channel, _)| {
            channel.close();
            io::Error::new(io::ErrorKind::ConnectionRefused, "listener closed")
        })?;
        debug!("Dialed {} from {}", service, from);
        Ok(remote)
    }

    /// Whether a live listener publishes `service`.
    pub fn is_listening(&self, service: &ServiceRecord) -> bool {
        self.hub
            .lock()
            .listeners
            .get(&service.uuid)
            .map(|listener| listener.inbox.is_open())
            .unwrap_or(false)
    }

    /// Number of listening endpoints still holding their queue.
    pub fn open_listeners(&self) -> usize {
        self.hub
            .lock()
            .listeners
            .values()
            .filter(|listener| listener.inbox.is_open())
            .count()
    }

    /// Number of outbound sockets neither closed nor connected.
    pub fn pending_outbound(&self) -> usize {
        self.hub
            .lock()
            .outbound
            .iter()
            .filter(|weak| live_outbound(weak).is_some())
            .count()
    }

    /// Number of channels whose local end is still held.
    pub fn open_channels(&self) -> usize {
        self.hub
            .lock()
            .channels
            .iter()
            .filter(|weak| live_channel(weak).is_some())
            .count()
    }
}

impl Transport for MemoryTransport {
    fn bind_listener(&self, service: &ServiceRecord) -> io::Result<Arc<dyn ListeningEndpoint>> {
        let mut hub = self.hub.lock();
        if hub.fail_bind {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "bind refused by adapter",
            ));
        }
        if let Some(existing) = hub.listeners.get(&service.uuid) {
            if existing.inbox.is_open() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("{} already bound", service),
                ));
            }
        }

        let listener = Arc::new(MemoryListener {
            inbox: Inbox::new(),
            signal: CloseSignal::new(),
        });
        hub.listeners.insert(service.uuid, listener.clone());
        Ok(listener as Arc<dyn ListeningEndpoint>)
    }

    fn outbound(
        &self,
        peer: PeerAddr,
        _service: &ServiceRecord,
    ) -> io::Result<Arc<dyn OutboundSocket>> {
        let socket = Arc::new(MemoryOutbound {
            peer,
            hub: Arc::downgrade(&self.hub),
            signal: CloseSignal::new(),
        });
        self.hub.lock().track_outbound(&socket);
        Ok(socket as Arc<dyn OutboundSocket>)
    }
}

/// Listening endpoint fed by [`MemoryTransport::dial`].
pub struct MemoryListener {
    inbox: Inbox<Incoming>,
    signal: CloseSignal,
}

impl Closeable for MemoryListener {
    fn close(&self) {
        self.signal.close();
        for (channel, peer) in self.inbox.close() {
            debug!("Dropping unaccepted channel from {}", peer);
            channel.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }
}

#[async_trait]
impl ListeningEndpoint for MemoryListener {
    async fn accept(&self) -> io::Result<(Arc<dyn Channel>, PeerAddr)> {
        let incoming = tokio::select! {
            biased;
            _ = self.signal.closed() => None,
            incoming = self.inbox.recv() => incoming,
        };
        incoming.ok_or_else(closed_error)
    }
}

/// Outbound socket resolved against the registered peers.
///
/// Once connected the socket is spent and reports closed; the channel owns
/// the link from then on.
pub struct MemoryOutbound {
    peer: PeerAddr,
    hub: Weak<Mutex<Hub>>,
    signal: CloseSignal,
}

impl Closeable for MemoryOutbound {
    fn close(&self) {
        self.signal.close();
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }
}

#[async_trait]
impl OutboundSocket for MemoryOutbound {
    async fn connect(&self) -> io::Result<Arc<dyn Channel>> {
        if self.signal.is_closed() {
            return Err(closed_error());
        }

        let Some(hub) = self.hub.upgrade() else {
            self.signal.close();
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport dropped"));
        };

        let remote_peer = hub.lock().peers.get(&self.peer).cloned();
        match remote_peer {
            None => {
                self.signal.close();
                Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("{} refused the connection", self.peer),
                ))
            }
            Some(RemotePeer::Unresponsive) => {
                self.signal.closed().await;
                Err(closed_error())
            }
            Some(RemotePeer::Accepting(inbox)) => {
                let (channel, remote) = hub.lock().open_channel();
                if inbox.send(remote).is_err() {
                    channel.close();
                    self.signal.close();
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        format!("{} is gone", self.peer),
                    ));
                }
                self.signal.close();
                Ok(channel as Arc<dyn Channel>)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    fn peer(n: u8) -> PeerAddr {
        PeerAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, n])
    }

    #[tokio::test]
    async fn test_dial_reaches_listener() {
        let transport = MemoryTransport::new();
        let listener = transport.bind_listener(&ServiceRecord::SECURE).unwrap();

        let mut remote = transport.dial(peer(1), &ServiceRecord::SECURE).unwrap();
        let (channel, from) = listener.accept().await.unwrap();
        assert_eq!(from, peer(1));

        remote.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 8];
        let n = channel.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");
    }

    #[tokio::test]
    async fn test_dial_without_listener_is_refused() {
        let transport = MemoryTransport::new();
        let err = transport.dial(peer(1), &ServiceRecord::SECURE).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);

        // Listening on one variant does not answer the other.
        let _listener = transport.bind_listener(&ServiceRecord::INSECURE).unwrap();
        assert!(transport.dial(peer(1), &ServiceRecord::SECURE).is_err());
    }

    #[tokio::test]
    async fn test_second_bind_requires_close() {
        let transport = MemoryTransport::new();
        let first = transport.bind_listener(&ServiceRecord::SECURE).unwrap();
        let err = transport
            .bind_listener(&ServiceRecord::SECURE)
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);

        first.close();
        assert!(transport.bind_listener(&ServiceRecord::SECURE).is_ok());
    }

    #[tokio::test]
    async fn test_close_unblocks_accept() {
        let transport = MemoryTransport::new();
        let listener = transport.bind_listener(&ServiceRecord::SECURE).unwrap();

        let pending = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.accept().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.close();

        let res = timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert!(res.is_err());
        assert_eq!(transport.open_listeners(), 0);
    }

    #[tokio::test]
    async fn test_outbound_to_registered_peer() {
        let transport = MemoryTransport::new();
        let mut inbox = transport.add_peer(peer(2));

        let socket = transport.outbound(peer(2), &ServiceRecord::SECURE).unwrap();
        assert_eq!(transport.pending_outbound(), 1);
        let channel = socket.connect().await.unwrap();
        assert_eq!(transport.pending_outbound(), 0);

        let mut remote = inbox.recv().await.unwrap();
        channel.write(b"abc").await.unwrap();
        let mut buf = [0u8; 3];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[tokio::test]
    async fn test_outbound_to_unknown_peer_is_refused() {
        let transport = MemoryTransport::new();
        let socket = transport.outbound(peer(3), &ServiceRecord::SECURE).unwrap();
        let err = socket.connect().await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert_eq!(transport.pending_outbound(), 0);
    }

    #[tokio::test]
    async fn test_close_unblocks_unresponsive_connect() {
        let transport = MemoryTransport::new();
        transport.add_unresponsive_peer(peer(4));
        let socket = transport.outbound(peer(4), &ServiceRecord::SECURE).unwrap();

        let pending = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.connect().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        socket.close();

        let res = timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert!(res.is_err());
    }

    #[test]
    fn test_bind_failure_switch() {
        let transport = MemoryTransport::new();
        transport.set_bind_failure(true);
        assert!(transport.bind_listener(&ServiceRecord::SECURE).is_err());
        transport.set_bind_failure(false);
        assert!(transport.bind_listener(&ServiceRecord::SECURE).is_ok());
    }

    #[tokio::test]
    async fn test_close_with_accept_pending_frees_binding() {
        let transport = MemoryTransport::new();
        let listener = transport.bind_listener(&ServiceRecord::SECURE).unwrap();
        let pending = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.accept().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The accept task has not run since the close.
        listener.close();
        assert!(!transport.is_listening(&ServiceRecord::SECURE));
        assert!(transport.bind_listener(&ServiceRecord::SECURE).is_ok());
        assert!(pending.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_spent_resources_are_forgotten() {
        let transport = MemoryTransport::new();
        let _inbox = transport.add_peer(peer(5));

        for _ in 0..10 {
            let socket = transport.outbound(peer(5), &ServiceRecord::SECURE).unwrap();
            let channel = socket.connect().await.unwrap();
            channel.close();
        }

        let hub = transport.hub.lock();
        assert!(hub.outbound.len() <= 1);
        assert!(hub.channels.len() <= 1);
        drop(hub);
        assert_eq!(transport.open_channels(), 0);
        assert_eq!(transport.pending_outbound(), 0);
    }
}
