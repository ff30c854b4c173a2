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

//! Error taxonomy for the connection manager.

use thiserror::Error;

/// Errors surfaced by the connection manager.
///
/// Worker failures travel as `ChatEvent::ConnectionFailed`; only
/// `NotConnected` and `Io` are returned directly from `send`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// The listening endpoint could not be published.
    #[error("failed to bind listening endpoint: {0}")]
    BindFailure(String),

    /// An outbound connect attempt failed.
    #[error("failed to connect: {0}")]
    ConnectFailure(String),

    /// Read or write error on an established session.
    #[error("session I/O error: {0}")]
    Io(String),

    /// No session is established.
    #[error("not connected")]
    NotConnected,
}

/// Result type for connection manager operations.
pub type ChatResult<T> = Result<T, ChatError>;
