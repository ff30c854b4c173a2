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

//! Outbound connector: a single connect attempt to one peer.

use std::io;
use std::sync::Arc;
use tracing::{debug, info};

use super::coordinator::{Origin, Shared, WorkerId};
use super::service::ServiceRecord;
use super::transport::{OutboundSocket, PeerAddr, Transport};

/// Handle to an in-flight connect. Owned by the coordinator.
pub(crate) struct ConnectorHandle {
    id: WorkerId,
    peer: PeerAddr,
    socket: Arc<dyn OutboundSocket>,
}

impl ConnectorHandle {
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn peer(&self) -> PeerAddr {
        self.peer
    }

    /// Close the socket, which aborts a pending connect.
    pub(crate) fn cancel(&self) {
        debug!("Cancelling connect {:?} to {}", self.id, self.peer);
        self.socket.close();
    }
}

/// Create the socket for `peer` and spawn the connect attempt.
///
/// Outbound connects always target the secure service record.
pub(crate) fn start(
    shared: Arc<Shared>,
    id: WorkerId,
    transport: &dyn Transport,
    peer: PeerAddr,
) -> io::Result<ConnectorHandle> {
    let socket = transport.outbound(peer, &ServiceRecord::SECURE)?;

    let connecting = socket.clone();
    tokio::spawn(async move {
        connect(shared, id, peer, connecting).await;
    });

    Ok(ConnectorHandle { id, peer, socket })
}

async fn connect(shared: Arc<Shared>, id: WorkerId, peer: PeerAddr, socket: Arc<dyn OutboundSocket>) {
    info!("Connecting to {}...", peer);

    match socket.connect().await {
        Ok(channel) => {
            info!("Connected to {}", peer);
            shared.promote(channel, peer, Origin::Connector(id));
        }
        Err(e) => {
            socket.close();
            shared.connect_failed(id, peer, e);
        }
    }
}
