// Copyright 2026 PM25 Link Team
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

//! Error types for the sensor link.

use std::io;
use thiserror::Error;

/// Result alias used by the session layer.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors surfaced by the session manager and command channel.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No radio hardware present.
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// Radio present but powered off.
    #[error("Bluetooth adapter disabled")]
    AdapterDisabled,

    /// Endpoint unreachable or handshake write failed.
    #[error("Connection to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },

    /// Command issued while the session is not ready.
    #[error("Not connected")]
    NotConnected,

    /// Read or write failure on an established session.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// Operation exceeded its configured timeout.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Remote end closed the stream.
    #[error("Connection closed by remote")]
    Closed,

    /// Response line exceeded the configured limit.
    #[error("Response line exceeds {max} bytes")]
    LineTooLong { max: usize },

    /// Command text contains a line terminator.
    #[error("Invalid command: {0:?}")]
    InvalidCommand(String),

    /// Operation cancelled by a disconnect request.
    #[error("Operation interrupted by disconnect")]
    Interrupted,

    /// The session worker is no longer running.
    #[error("Session manager closed")]
    ManagerClosed,
}

impl LinkError {
    /// Whether this error can end a connection attempt.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. }
                | Self::Interrupted
                | Self::AdapterUnavailable
                | Self::AdapterDisabled
                | Self::Timeout {
                    operation: "connect",
                    ..
                }
        )
    }
}
