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

//! Event processing for the terminal front end.

use anyhow::Result;
use std::io::Write;
use tracing::{debug, error, info};

use crate::bluetooth::{ChatEvent, Direction, PeerAddr};
use crate::state::ConnectionState;

/// Render coordinator events as chat transcript lines.
pub struct EventPrinter<W: Write> {
    out: W,
    state: ConnectionState,
    peer: Option<PeerAddr>,
    bytes_received: u64,
}

impl<W: Write> EventPrinter<W> {
    /// Create a new event printer.
    pub fn new(out: W) -> Self {
        Self {
            out,
            state: ConnectionState::Idle,
            peer: None,
            bytes_received: 0,
        }
    }

    /// Last state seen.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Total bytes received over all sessions.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Process a single event.
    pub fn process_event(&mut self, event: &ChatEvent) -> Result<()> {
        match event {
            ChatEvent::StateChanged(state) => {
                debug!("State changed: {}", state);
                self.state = *state;
                if *state != ConnectionState::InSession {
                    self.peer = None;
                }
                writeln!(self.out, "* {}", state)?;
            }
            ChatEvent::Connected { peer, direction } => {
                info!("Device connected: {}", peer);
                self.peer = Some(*peer);
                let how = match direction {
                    Direction::Inbound => "accepted from",
                    Direction::Outbound => "connected to",
                };
                writeln!(self.out, "* {} {}", how, peer)?;
            }
            ChatEvent::DataReceived(data) => {
                self.bytes_received += data.len() as u64;
                let from = self
                    .peer
                    .map(|peer| peer.to_string())
                    .unwrap_or_else(|| "peer".to_string());
                writeln!(self.out, "{}> {}", from, render(data))?;
            }
            ChatEvent::DataSent(data) => {
                writeln!(self.out, "me> {}", render(data))?;
            }
            ChatEvent::ConnectionFailed(e) => {
                error!("Connection failed: {}", e);
                writeln!(self.out, "! {}", e)?;
            }
            ChatEvent::ConnectionLost => {
                info!("Device disconnected");
                writeln!(self.out, "! connection lost")?;
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Printable form of a chunk: text when it is UTF-8, hex otherwise.
pub fn render(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => text.trim_end_matches(['\r', '\n']).to_string(),
        Err(_) => format!("<{}>", hex::encode(data)),
    }
}
