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

//! Command-line argument parsing.

use std::path::PathBuf;

use bluechat::bluetooth::PeerAddr;
use clap::{Parser, Subcommand};

/// Bluetooth chat with a single peer.
#[derive(Parser, Debug, Clone)]
#[command(name = "bluechat")]
#[command(about = "Chat with one Bluetooth peer over RFCOMM")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to the user config directory).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use the in-process loopback transport with an echo peer.
    #[arg(long)]
    pub loopback: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Wait for a peer to connect.
    Listen,
    /// Connect to a peer by Bluetooth address.
    Connect {
        /// Peer address, e.g. 00:11:22:33:44:55.
        #[arg(value_parser = parse_peer)]
        address: PeerAddr,
    },
    /// List paired devices.
    Devices,
}

fn parse_peer(s: &str) -> Result<PeerAddr, String> {
    s.parse()
        .map_err(|_| format!("invalid Bluetooth address: {}", s))
}

/// A line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Quit,
    Listen,
    Connect(PeerAddr),
    Status,
    Message(String),
    Invalid(String),
}

impl Input {
    /// Parse a prompt line. Lines starting with `/` are commands.
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let Some(command) = trimmed.strip_prefix('/') else {
            return Input::Message(line.to_string());
        };

        let mut parts = command.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("quit"), None) => Input::Quit,
            (Some("listen"), None) => Input::Listen,
            (Some("status"), None) => Input::Status,
            (Some("connect"), Some(addr)) => match parse_peer(addr) {
                Ok(peer) => Input::Connect(peer),
                Err(reason) => Input::Invalid(reason),
            },
            _ => Input::Invalid(format!("unknown command: {}", trimmed)),
        }
    }
}
