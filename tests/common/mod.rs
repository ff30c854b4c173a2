//! Shared helpers for connection lifecycle tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bluechat::bluetooth::{
    ChatEvent, Coordinator, CoordinatorOptions, MemoryTransport, PeerAddr, Transport,
};
use bluechat::ConnectionState;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Upper bound for anything the tests wait on.
pub const WAIT: Duration = Duration::from_secs(2);

pub fn peer(n: u8) -> PeerAddr {
    PeerAddr::new([0x10, 0x20, 0x30, 0x40, 0x50, n])
}

pub struct Harness {
    pub transport: MemoryTransport,
    pub coordinator: Coordinator,
    pub events: mpsc::UnboundedReceiver<ChatEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(CoordinatorOptions::default())
    }

    pub fn with_options(options: CoordinatorOptions) -> Self {
        let transport = MemoryTransport::new();
        let shared: Arc<dyn Transport> = Arc::new(transport.clone());
        Self::with_transport(transport, shared, options)
    }

    /// Drive the coordinator through `driver` while the test keeps `transport`
    /// for dialing and inspection.
    pub fn with_transport(
        transport: MemoryTransport,
        driver: Arc<dyn Transport>,
        options: CoordinatorOptions,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(driver, options, tx);
        Self {
            transport,
            coordinator,
            events,
        }
    }

    /// Next event, failing the test after [`WAIT`].
    pub async fn next_event(&mut self) -> ChatEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Skip events until the state reaches `state`.
    pub async fn wait_for_state(&mut self, state: ConnectionState) {
        loop {
            if let ChatEvent::StateChanged(s) = self.next_event().await {
                if s == state {
                    return;
                }
            }
        }
    }

    /// Collect `DataReceived` chunks until `len` bytes have arrived.
    pub async fn received(&mut self, len: usize) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        let mut total = 0;
        while total < len {
            match self.next_event().await {
                ChatEvent::DataReceived(chunk) => {
                    total += chunk.len();
                    chunks.push(chunk);
                }
                other => panic!("unexpected event while reading: {:?}", other),
            }
        }
        chunks
    }

    /// Events emitted within a short settling period.
    pub async fn drain(&mut self) -> Vec<ChatEvent> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Assert the live worker set matches the state table.
    pub fn assert_workers_match_state(&self) {
        let workers = self.coordinator.active_workers();
        assert!(workers.count() <= 1, "more than one worker alive: {:?}", workers);
        match self.coordinator.state() {
            ConnectionState::Idle => assert_eq!(workers.count(), 0),
            ConnectionState::Listening => assert!(workers.listener),
            ConnectionState::Connecting => assert!(workers.connector),
            ConnectionState::InSession => assert!(workers.session),
        }
    }
}

/// Poll `cond` until it holds or [`WAIT`] elapses.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
