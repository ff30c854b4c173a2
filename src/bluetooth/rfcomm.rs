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

//! Bluetooth RFCOMM transport backed by BlueZ.
//!
//! Both chat services are registered with BlueZ as RFCOMM profiles, which
//! publishes their SDP records under the service UUIDs. BlueZ hands every
//! connection for a profile to us; it is routed to the outbound socket
//! waiting for that peer, else to the bound listening endpoint, else
//! rejected.

use anyhow::Result;
use async_trait::async_trait;
use bluer::rfcomm::stream::{OwnedReadHalf, OwnedWriteHalf};
use bluer::rfcomm::{ConnectRequest, Profile, ProfileHandle, ReqError, Role, Stream};
use bluer::{Adapter, Address, Device, Session};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::service::ServiceRecord;
use super::transport::{
    closed_error, Channel, CloseSignal, Closeable, Inbox, ListeningEndpoint, OutboundSocket,
    PeerAddr, StreamChannel, Transport,
};
use crate::config::BluetoothConfig;

type RfcommChannel = StreamChannel<OwnedReadHalf, OwnedWriteHalf>;

/// Who wants connections for each profile right now.
#[derive(Default)]
struct Routes {
    listeners: HashMap<Uuid, Weak<RfcommListener>>,
    outbound: HashMap<(Uuid, Address), Weak<RfcommOutbound>>,
}

enum Route {
    Outbound(Arc<RfcommOutbound>),
    Listener(Arc<RfcommListener>),
    Reject,
}

impl Routes {
    fn route(&self, uuid: Uuid, peer: Address) -> Route {
        if let Some(socket) = self.outbound.get(&(uuid, peer)).and_then(Weak::upgrade) {
            if !socket.is_closed() {
                return Route::Outbound(socket);
            }
        }
        match self.listeners.get(&uuid).and_then(Weak::upgrade) {
            Some(listener) if listener.inbox.is_open() => Route::Listener(listener),
            _ => Route::Reject,
        }
    }
}

/// RFCOMM transport on the default adapter.
pub struct RfcommTransport {
    _session: Session,
    adapter: Adapter,
    routes: Arc<Mutex<Routes>>,
    routers: Vec<JoinHandle<()>>,
}

impl RfcommTransport {
    /// Open a BlueZ session, prepare the default adapter and register the
    /// chat profiles.
    pub async fn new(config: &BluetoothConfig) -> Result<Self> {
        info!("Initializing Bluetooth transport...");

        // Create BlueZ session
        let session = bluer::Session::new().await?;
        info!("BlueZ session created");

        // Get the default adapter
        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        // Ensure adapter is powered on
        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        if config.discoverable {
            adapter.set_discoverable(true).await?;
            adapter.set_pairable(true).await?;
            info!("Adapter is discoverable and pairable");
        }

        adapter.set_alias(config.device_name.clone()).await?;
        info!("Bluetooth name set to: {}", config.device_name);

        let routes = Arc::new(Mutex::new(Routes::default()));
        let mut routers = Vec::new();
        for (record, channel) in [
            (ServiceRecord::SECURE, config.rfcomm_channel),
            (ServiceRecord::INSECURE, config.insecure_rfcomm_channel),
        ] {
            let handle = session.register_profile(profile_for(&record, channel)).await?;
            info!("Registered {} on RFCOMM channel {}", record, channel);
            routers.push(tokio::spawn(route_requests(
                handle,
                record.uuid,
                Arc::downgrade(&routes),
            )));
        }

        Ok(Self {
            _session: session,
            adapter,
            routes,
            routers,
        })
    }

    /// Get the adapter address.
    pub async fn address(&self) -> Result<Address> {
        Ok(self.adapter.address().await?)
    }

    /// Get paired devices.
    pub async fn paired_devices(&self) -> Result<Vec<PairedDevice>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if device.is_paired().await? {
                let name = device.alias().await.unwrap_or_else(|_| addr.to_string());
                devices.push(PairedDevice {
                    address: addr,
                    name,
                });
            }
        }

        Ok(devices)
    }
}

impl Drop for RfcommTransport {
    fn drop(&mut self) {
        // Dropping the profile handles unregisters the SDP records.
        for router in &self.routers {
            router.abort();
        }
    }
}

/// Profile publishing `record`. Outbound connects always resolve the secure
/// record, so only that profile takes the client role as well.
fn profile_for(record: &ServiceRecord, channel: u8) -> Profile {
    let secure = record.variant.is_secure();
    Profile {
        uuid: record.uuid,
        name: Some(record.name.to_string()),
        channel: Some(channel.into()),
        role: if secure { None } else { Some(Role::Server) },
        require_authentication: Some(secure),
        require_authorization: Some(false),
        auto_connect: Some(false),
        ..Default::default()
    }
}

async fn route_requests(mut handle: ProfileHandle, uuid: Uuid, routes: Weak<Mutex<Routes>>) {
    while let Some(request) = handle.next().await {
        let peer = request.device();
        let route = match routes.upgrade() {
            Some(routes) => routes.lock().route(uuid, peer),
            None => Route::Reject,
        };
        let unclaimed = match route {
            Route::Outbound(socket) => socket.inbox.push(request).err(),
            Route::Listener(listener) => listener.inbox.push(request).err(),
            Route::Reject => Some(request),
        };
        if let Some(request) = unclaimed {
            debug!("Rejecting RFCOMM connection from {} for {}", peer, uuid);
            request.reject(ReqError::Rejected);
        }
    }
    debug!("Profile {} unregistered", uuid);
}

fn reject_all(requests: Vec<ConnectRequest>) {
    for request in requests {
        request.reject(ReqError::Rejected);
    }
}

fn stream_channel(stream: Stream) -> Arc<dyn Channel> {
    let (reader, writer) = stream.into_split();
    Arc::new(RfcommChannel::new(reader, writer))
}

impl Transport for RfcommTransport {
    fn bind_listener(&self, service: &ServiceRecord) -> io::Result<Arc<dyn ListeningEndpoint>> {
        let mut routes = self.routes.lock();
        if let Some(existing) = routes.listeners.get(&service.uuid).and_then(Weak::upgrade) {
            if existing.inbox.is_open() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("{} already bound", service),
                ));
            }
        }

        let listener = Arc::new(RfcommListener {
            inbox: Inbox::new(),
            signal: CloseSignal::new(),
        });
        routes
            .listeners
            .insert(service.uuid, Arc::downgrade(&listener));
        info!("Accepting RFCOMM connections for {}", service);
        Ok(listener as Arc<dyn ListeningEndpoint>)
    }

    fn outbound(
        &self,
        peer: PeerAddr,
        service: &ServiceRecord,
    ) -> io::Result<Arc<dyn OutboundSocket>> {
        let device = self.adapter.device(peer).map_err(io::Error::from)?;
        let socket = Arc::new(RfcommOutbound {
            device,
            uuid: service.uuid,
            inbox: Inbox::new(),
            signal: CloseSignal::new(),
        });

        let mut routes = self.routes.lock();
        routes.outbound.retain(|_, weak| weak.strong_count() > 0);
        routes
            .outbound
            .insert((service.uuid, peer), Arc::downgrade(&socket));
        Ok(socket as Arc<dyn OutboundSocket>)
    }
}

/// A paired Bluetooth device.
#[derive(Debug, Clone)]
pub struct PairedDevice {
    pub address: Address,
    pub name: String,
}

/// Listening endpoint for one profile. Holds no socket of its own; BlueZ
/// connections queue in the inbox until accepted.
struct RfcommListener {
    inbox: Inbox<ConnectRequest>,
    signal: CloseSignal,
}

impl Closeable for RfcommListener {
    fn close(&self) {
        if self.signal.close() {
            debug!("RFCOMM listener closed");
        }
        reject_all(self.inbox.close());
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }
}

#[async_trait]
impl ListeningEndpoint for RfcommListener {
    async fn accept(&self) -> io::Result<(Arc<dyn Channel>, PeerAddr)> {
        let request = tokio::select! {
            biased;
            _ = self.signal.closed() => None,
            request = self.inbox.recv() => request,
        };
        let request = request.ok_or_else(closed_error)?;
        let peer = request.device();
        let stream = request.accept().map_err(io::Error::from)?;
        Ok((stream_channel(stream), peer))
    }
}

/// Outbound connect to one peer through the profile UUID.
struct RfcommOutbound {
    device: Device,
    uuid: Uuid,
    inbox: Inbox<ConnectRequest>,
    signal: CloseSignal,
}

impl Closeable for RfcommOutbound {
    fn close(&self) {
        self.signal.close();
        reject_all(self.inbox.close());
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }
}

#[async_trait]
impl OutboundSocket for RfcommOutbound {
    async fn connect(&self) -> io::Result<Arc<dyn Channel>> {
        if self.signal.is_closed() {
            return Err(closed_error());
        }
        debug!("RFCOMM connecting to {} for {}", self.device.address(), self.uuid);

        // BlueZ resolves the channel over SDP and hands the link to the
        // profile, which routes it back here.
        let attempt = async {
            self.device
                .connect_profile(&self.uuid)
                .await
                .map_err(io::Error::from)?;
            self.inbox.recv().await.ok_or_else(closed_error)
        };
        let outcome = tokio::select! {
            biased;
            _ = self.signal.closed() => None,
            res = attempt => Some(res),
        };
        let request = outcome.ok_or_else(closed_error)??;

        // Spent: anything else from this peer goes to the listener.
        self.close();
        let stream = request.accept().map_err(io::Error::from)?;
        Ok(stream_channel(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener() -> Arc<RfcommListener> {
        Arc::new(RfcommListener {
            inbox: Inbox::new(),
            signal: CloseSignal::new(),
        })
    }

    #[test]
    fn test_profiles_publish_service_records() {
        let secure = profile_for(&ServiceRecord::SECURE, 3);
        assert_eq!(secure.uuid, ServiceRecord::SECURE.uuid);
        assert_eq!(secure.name.as_deref(), Some(ServiceRecord::SECURE.name));
        assert_eq!(secure.channel, Some(3));
        assert!(secure.role.is_none());
        assert_eq!(secure.require_authentication, Some(true));
        assert_eq!(secure.auto_connect, Some(false));

        let insecure = profile_for(&ServiceRecord::INSECURE, 4);
        assert_eq!(insecure.uuid, ServiceRecord::INSECURE.uuid);
        assert_eq!(insecure.name.as_deref(), Some(ServiceRecord::INSECURE.name));
        assert_eq!(insecure.channel, Some(4));
        assert!(matches!(insecure.role, Some(Role::Server)));
        assert_eq!(insecure.require_authentication, Some(false));
    }

    #[test]
    fn test_requests_route_to_open_listener_only() {
        let peer = Address::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
        let uuid = ServiceRecord::SECURE.uuid;
        let mut routes = Routes::default();
        assert!(matches!(routes.route(uuid, peer), Route::Reject));

        let bound = listener();
        routes.listeners.insert(uuid, Arc::downgrade(&bound));
        assert!(matches!(routes.route(uuid, peer), Route::Listener(_)));
        assert!(matches!(
            routes.route(ServiceRecord::INSECURE.uuid, peer),
            Route::Reject
        ));

        bound.close();
        assert!(matches!(routes.route(uuid, peer), Route::Reject));

        let rebound = listener();
        routes.listeners.insert(uuid, Arc::downgrade(&rebound));
        drop(rebound);
        assert!(matches!(routes.route(uuid, peer), Route::Reject));
    }
}
