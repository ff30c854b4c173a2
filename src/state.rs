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

//! Connection state.

use std::fmt;

/// Lifecycle state of the single logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Nothing running.
    #[default]
    Idle,
    /// Accepting inbound connections.
    Listening,
    /// Outbound connect attempt in flight.
    Connecting,
    /// Session established with a remote peer.
    InSession,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Listening => "Listening...",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::InSession => "Connected",
        }
    }

    /// Whether a session is established.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::InSession)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert!(!ConnectionState::Idle.is_connected());
        assert!(ConnectionState::InSession.is_connected());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ConnectionState::Listening.to_string(), "Listening...");
        assert_eq!(ConnectionState::InSession.as_str(), "Connected");
    }
}
