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

//! Bluetooth connection module.
//!
//! Manages one RFCOMM link to a single remote peer, either accepted by the
//! listener or opened by an outbound connect, and hands it to a session.

mod connector;
mod coordinator;
mod listener;
pub mod memory;
pub mod rfcomm;
pub mod service;
mod session;
pub mod transport;

pub use coordinator::{ActiveWorkers, ChatEvent, Coordinator, CoordinatorOptions, Direction};
pub use memory::MemoryTransport;
pub use rfcomm::{PairedDevice, RfcommTransport};
pub use service::{ServiceRecord, ServiceVariant};
pub use transport::{
    Channel, Closeable, ListeningEndpoint, OutboundSocket, PeerAddr, StreamChannel, Transport,
};
