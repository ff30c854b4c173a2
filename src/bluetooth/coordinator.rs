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

//! Connection coordinator.
//!
//! Owns the connection state and the handles of the live workers. Every
//! transition happens under one `parking_lot::Mutex`, which is never held
//! across an `.await`. Workers run as independent tasks and report back
//! through the methods on [`Shared`]; they never touch each other.
//!
//! | State        | Live worker |
//! |--------------|-------------|
//! | `Idle`       | none        |
//! | `Listening`  | listener    |
//! | `Connecting` | connector   |
//! | `InSession`  | session     |

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connector::{self, ConnectorHandle};
use super::listener::{self, ListenerHandle};
use super::service::{ServiceRecord, ServiceVariant, DEFAULT_READ_BUFFER};
use super::session::{self, SessionHandle};
use super::transport::{Channel, PeerAddr, Transport};
use crate::error::{ChatError, ChatResult};
use crate::state::ConnectionState;

/// Which side opened the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted by the listener.
    Inbound,
    /// Established by an outbound connect.
    Outbound,
}

/// Notifications delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// Session established with `peer`.
    Connected { peer: PeerAddr, direction: Direction },
    /// Chunk read from the session.
    DataReceived(Vec<u8>),
    /// Bytes written to the session.
    DataSent(Vec<u8>),
    /// Listener bind or outbound connect failed.
    ConnectionFailed(ChatError),
    /// Session ended by the peer or by an I/O error.
    ConnectionLost,
}

/// Construction-time settings.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorOptions {
    /// Service record the listener publishes.
    pub variant: ServiceVariant,
    /// Size of the session read buffer.
    pub read_buffer_size: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            variant: ServiceVariant::Secure,
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }
}

/// Which workers are currently alive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveWorkers {
    pub listener: bool,
    pub connector: bool,
    pub session: bool,
}

impl ActiveWorkers {
    pub fn count(&self) -> usize {
        [self.listener, self.connector, self.session]
            .iter()
            .filter(|alive| **alive)
            .count()
    }
}

/// Generation number identifying one worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerId(u64);

/// Worker that produced a channel.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Origin {
    Listener(WorkerId),
    Connector(WorkerId),
}

/// Result of a promotion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Promotion {
    Promoted,
    Discarded,
}

struct Inner {
    state: ConnectionState,
    listener: Option<ListenerHandle>,
    connector: Option<ConnectorHandle>,
    session: Option<SessionHandle>,
    next_worker: u64,
}

impl Inner {
    fn next_id(&mut self) -> WorkerId {
        self.next_worker += 1;
        WorkerId(self.next_worker)
    }
}

/// State shared between the coordinator and its workers.
pub(crate) struct Shared {
    transport: Arc<dyn Transport>,
    service: ServiceRecord,
    read_buffer_size: usize,
    events: mpsc::UnboundedSender<ChatEvent>,
    inner: Mutex<Inner>,
}

impl Shared {
    pub(crate) fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    fn transition(&self, inner: &mut Inner, next: ConnectionState) {
        if inner.state != next {
            info!("Connection state: {:?} -> {:?}", inner.state, next);
            inner.state = next;
            self.emit(ChatEvent::StateChanged(next));
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Turn a freshly opened channel into the session.
    ///
    /// A listener-accepted channel wins while `Listening` or `Connecting`.
    /// A connector's channel wins only while that connector is current.
    /// The loser's channel is closed unused.
    pub(crate) fn promote(
        self: &Arc<Self>,
        channel: Arc<dyn Channel>,
        peer: PeerAddr,
        origin: Origin,
    ) -> Promotion {
        let mut inner = self.inner.lock();

        let accepted = match origin {
            Origin::Listener(_) => matches!(
                inner.state,
                ConnectionState::Listening | ConnectionState::Connecting
            ),
            Origin::Connector(id) => inner
                .connector
                .as_ref()
                .map(|connector| connector.id() == id)
                .unwrap_or(false),
        };
        if !accepted {
            debug!(
                "Discarding channel from {} ({:?}) in state {:?}",
                peer, origin, inner.state
            );
            drop(inner);
            channel.close();
            return Promotion::Discarded;
        }

        // Only one peer is served; stop everything else first.
        if let Some(listener) = inner.listener.take() {
            listener.cancel();
        }
        if let Some(connector) = inner.connector.take() {
            connector.cancel();
        }
        if let Some(previous) = inner.session.take() {
            previous.cancel();
        }

        let id = inner.next_id();
        inner.session = Some(session::start(
            self.clone(),
            id,
            channel,
            peer,
            self.read_buffer_size,
        ));
        self.transition(&mut inner, ConnectionState::InSession);

        let direction = match origin {
            Origin::Listener(_) => Direction::Inbound,
            Origin::Connector(_) => Direction::Outbound,
        };
        info!("Session established with {} ({:?})", peer, direction);
        self.emit(ChatEvent::Connected { peer, direction });
        Promotion::Promoted
    }

    /// Outbound attempt `id` failed.
    pub(crate) fn connect_failed(&self, id: WorkerId, peer: PeerAddr, err: io::Error) {
        let mut inner = self.inner.lock();
        let current = inner
            .connector
            .as_ref()
            .map(|connector| connector.id() == id)
            .unwrap_or(false);
        if !current {
            debug!("Superseded connect to {} ended: {}", peer, err);
            return;
        }

        warn!("Connect to {} failed: {}", peer, err);
        inner.connector = None;
        self.transition(&mut inner, ConnectionState::Idle);
        self.emit(ChatEvent::ConnectionFailed(ChatError::ConnectFailure(
            err.to_string(),
        )));
    }

    /// Deliver a chunk read by session `id`. Returns `false` once the
    /// session is no longer current.
    pub(crate) fn deliver(&self, id: WorkerId, data: &[u8]) -> bool {
        let inner = self.inner.lock();
        let current = self.is_current_session(&inner, id);
        if current {
            self.emit(ChatEvent::DataReceived(data.to_vec()));
        }
        current
    }

    /// Report bytes written by session `id`, unless it has since ended.
    pub(crate) fn record_sent(&self, id: WorkerId, data: &[u8]) {
        let inner = self.inner.lock();
        if self.is_current_session(&inner, id) {
            self.emit(ChatEvent::DataSent(data.to_vec()));
        }
    }

    fn is_current_session(&self, inner: &Inner, id: WorkerId) -> bool {
        inner
            .session
            .as_ref()
            .map(|session| session.id() == id)
            .unwrap_or(false)
    }

    /// Session `id` stopped reading.
    pub(crate) fn session_ended(&self, id: WorkerId) {
        let mut inner = self.inner.lock();
        if !self.is_current_session(&inner, id) {
            return;
        }

        if let Some(session) = inner.session.take() {
            session.cancel();
        }
        self.emit(ChatEvent::ConnectionLost);
        self.transition(&mut inner, ConnectionState::Idle);
    }
}

/// Connection coordinator for a single remote peer.
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Create a coordinator in the `Idle` state.
    pub fn new(
        transport: Arc<dyn Transport>,
        options: CoordinatorOptions,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> Self {
        let shared = Arc::new(Shared {
            transport,
            service: options.variant.record(),
            read_buffer_size: options.read_buffer_size.max(1),
            events,
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                listener: None,
                connector: None,
                session: None,
                next_worker: 0,
            }),
        });
        Self { shared }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Peer of the live session, if any.
    pub fn peer(&self) -> Option<PeerAddr> {
        self.shared
            .inner
            .lock()
            .session
            .as_ref()
            .map(|session| session.peer())
    }

    /// Service record the listener publishes.
    pub fn service(&self) -> ServiceRecord {
        self.shared.service
    }

    /// Workers currently alive.
    pub fn active_workers(&self) -> ActiveWorkers {
        let inner = self.shared.inner.lock();
        ActiveWorkers {
            listener: inner.listener.is_some(),
            connector: inner.connector.is_some(),
            session: inner.session.is_some(),
        }
    }

    /// Start accepting inbound connections.
    ///
    /// Supersedes a live session or outbound attempt. Calling it while
    /// already listening changes nothing. A bind failure leaves the
    /// coordinator `Idle` and emits `ConnectionFailed`.
    pub fn start_listening(&self) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        if let Some(session) = inner.session.take() {
            info!("Listening supersedes session with {}", session.peer());
            session.cancel();
        }
        if let Some(connector) = inner.connector.take() {
            info!("Listening supersedes connect to {}", connector.peer());
            connector.cancel();
        }
        if inner.listener.is_some() {
            shared.transition(&mut inner, ConnectionState::Listening);
            return;
        }

        let id = inner.next_id();
        match listener::start(shared.clone(), id, shared.transport.as_ref(), &shared.service) {
            Ok(handle) => {
                inner.listener = Some(handle);
                shared.transition(&mut inner, ConnectionState::Listening);
            }
            Err(e) => {
                warn!("Failed to bind {}: {}", shared.service, e);
                shared.transition(&mut inner, ConnectionState::Idle);
                shared.emit(ChatEvent::ConnectionFailed(ChatError::BindFailure(
                    e.to_string(),
                )));
            }
        }
    }

    /// Connect to `peer`, superseding any session, listener or earlier
    /// attempt. The outcome arrives as an event.
    pub fn connect_to(&self, peer: PeerAddr) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        if let Some(session) = inner.session.take() {
            info!("Connect supersedes session with {}", session.peer());
            session.cancel();
        }
        if let Some(listener) = inner.listener.take() {
            listener.cancel();
        }
        if let Some(connector) = inner.connector.take() {
            info!("Connect supersedes attempt to {}", connector.peer());
            connector.cancel();
        }

        let id = inner.next_id();
        match connector::start(shared.clone(), id, shared.transport.as_ref(), peer) {
            Ok(handle) => {
                inner.connector = Some(handle);
                shared.transition(&mut inner, ConnectionState::Connecting);
            }
            Err(e) => {
                warn!("Failed to open socket for {}: {}", peer, e);
                shared.transition(&mut inner, ConnectionState::Idle);
                shared.emit(ChatEvent::ConnectionFailed(ChatError::ConnectFailure(
                    e.to_string(),
                )));
            }
        }
    }

    /// Write `bytes` to the live session.
    ///
    /// A failed write is returned to the caller but does not end the
    /// session; only the read loop decides that.
    pub async fn send(&self, bytes: &[u8]) -> ChatResult<()> {
        let session = {
            let inner = self.shared.inner.lock();
            match (&inner.session, inner.state) {
                (Some(session), ConnectionState::InSession) => session.clone(),
                _ => return Err(ChatError::NotConnected),
            }
        };

        match session.write(bytes).await {
            Ok(()) => {
                self.shared.record_sent(session.id(), bytes);
                Ok(())
            }
            Err(e) => {
                warn!("Write to {} failed: {}", session.peer(), e);
                Err(ChatError::Io(e.to_string()))
            }
        }
    }

    /// Stop every worker and return to `Idle`. Safe from any state.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        if let Some(listener) = inner.listener.take() {
            listener.cancel();
        }
        if let Some(connector) = inner.connector.take() {
            connector.cancel();
        }
        if let Some(session) = inner.session.take() {
            session.cancel();
        }
        shared.transition(&mut inner, ConnectionState::Idle);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
