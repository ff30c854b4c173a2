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

//! Listener worker: accept loop for inbound connections.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::coordinator::{Origin, Promotion, Shared, WorkerId};
use super::service::ServiceRecord;
use super::transport::{ListeningEndpoint, Transport};
use crate::state::ConnectionState;

/// Pause after an accept error on a still-open endpoint.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Handle to a running listener. Owned by the coordinator.
pub(crate) struct ListenerHandle {
    id: WorkerId,
    endpoint: Arc<dyn ListeningEndpoint>,
}

impl ListenerHandle {
    #[cfg(test)]
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Close the endpoint, which unblocks the accept loop.
    pub(crate) fn cancel(&self) {
        debug!("Cancelling listener {:?}", self.id);
        self.endpoint.close();
    }
}

/// Bind `service` and spawn the accept loop.
pub(crate) fn start(
    shared: Arc<Shared>,
    id: WorkerId,
    transport: &dyn Transport,
    service: &ServiceRecord,
) -> io::Result<ListenerHandle> {
    let endpoint = transport.bind_listener(service)?;
    info!("Listening for {}", service);

    let accepting = endpoint.clone();
    tokio::spawn(async move {
        accept_loop(shared, id, accepting).await;
    });

    Ok(ListenerHandle { id, endpoint })
}

/// Accept channels until the endpoint is closed or a session exists.
async fn accept_loop(shared: Arc<Shared>, id: WorkerId, endpoint: Arc<dyn ListeningEndpoint>) {
    info!("Waiting for connections...");

    while !endpoint.is_closed() {
        match endpoint.accept().await {
            Ok((channel, peer)) => {
                info!("Connection from: {}", peer);
                if shared.promote(channel, peer, Origin::Listener(id)) == Promotion::Discarded
                    && shared.state() == ConnectionState::InSession
                {
                    break;
                }
            }
            Err(e) if endpoint.is_closed() => {
                debug!("Listener {:?} stopped: {}", id, e);
                break;
            }
            Err(e) => {
                warn!("Accept error: {}", e);
                // Keep listening despite errors
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }

    debug!("Accept loop {:?} exited", id);
}
