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

//! Session worker for an established channel.
//!
//! Data is delivered as raw chunks in the order they are read; there is no
//! framing. Only the read loop ends a session: end of stream or a read
//! error closes the channel and returns the coordinator to `Idle`.

use std::io;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::coordinator::{Shared, WorkerId};
use super::transport::{Channel, PeerAddr};

/// Handle to the live session. Owned by the coordinator.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    id: WorkerId,
    peer: PeerAddr,
    channel: Arc<dyn Channel>,
}

impl SessionHandle {
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn peer(&self) -> PeerAddr {
        self.peer
    }

    /// Write to the channel. Failure is reported, not fatal.
    pub(crate) async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.channel.write(bytes).await
    }

    /// Close the channel, which unblocks the read loop.
    pub(crate) fn cancel(&self) {
        debug!("Cancelling session {:?} with {}", self.id, self.peer);
        self.channel.close();
    }
}

/// Spawn the read loop over `channel`.
pub(crate) fn start(
    shared: Arc<Shared>,
    id: WorkerId,
    channel: Arc<dyn Channel>,
    peer: PeerAddr,
    read_buffer_size: usize,
) -> SessionHandle {
    let reading = channel.clone();
    tokio::spawn(async move {
        read_loop(shared, id, reading, read_buffer_size).await;
    });

    SessionHandle { id, peer, channel }
}

async fn read_loop(shared: Arc<Shared>, id: WorkerId, channel: Arc<dyn Channel>, buffer_size: usize) {
    info!("Session {:?} started", id);
    let mut buf = vec![0u8; buffer_size];

    loop {
        match channel.read(&mut buf).await {
            Ok(0) => {
                info!("Connection closed by remote");
                break;
            }
            Ok(n) => {
                debug!("Received {} bytes", n);
                if !shared.deliver(id, &buf[..n]) {
                    break;
                }
            }
            Err(e) if channel.is_closed() => {
                debug!("Session {:?} cancelled: {}", id, e);
                break;
            }
            Err(e) => {
                error!("Read error: {}", e);
                break;
            }
        }
    }

    channel.close();
    shared.session_ended(id);
}
