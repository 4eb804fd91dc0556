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

//! Transport adapter abstraction.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A connected duplex byte stream.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

/// Boxed stream handed out by a transport adapter.
pub type BoxedStream = Box<dyn DuplexStream>;

/// Power state of the local radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unavailable,
    Disabled,
    Enabling,
    Enabled,
    Disabling,
}

impl AdapterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterState::Unavailable => "Unavailable",
            AdapterState::Disabled => "Disabled",
            AdapterState::Enabling => "Enabling...",
            AdapterState::Enabled => "Enabled",
            AdapterState::Disabling => "Disabling...",
        }
    }
}

/// Radio power transition reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    Enabling,
    Enabled,
    Disabling,
    Disabled,
}

impl RadioEvent {
    /// Adapter state after this transition.
    pub fn resulting_state(&self) -> AdapterState {
        match self {
            RadioEvent::Enabling => AdapterState::Enabling,
            RadioEvent::Enabled => AdapterState::Enabled,
            RadioEvent::Disabling => AdapterState::Disabling,
            RadioEvent::Disabled => AdapterState::Disabled,
        }
    }

    /// Whether the radio is going or gone down.
    pub fn is_power_down(&self) -> bool {
        matches!(self, RadioEvent::Disabling | RadioEvent::Disabled)
    }
}

/// Name and address of the local adapter, sent during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub name: String,
    pub address: String,
}

impl LocalIdentity {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Capabilities the session manager needs from the radio stack.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Whether radio hardware exists at all.
    fn is_available(&self) -> bool;

    /// Whether the radio is powered on.
    async fn is_enabled(&self) -> bool;

    /// Ask the host to power the radio on.
    async fn request_enable(&self) -> Result<()>;

    /// Open a stream to the device at `address`.
    async fn open_connection(&self, address: &str) -> io::Result<BoxedStream>;

    /// Identity of the local adapter.
    async fn local_identity(&self) -> Result<LocalIdentity>;

    /// Display name of a remote device, if known.
    async fn remote_name(&self, address: &str) -> Option<String>;

    /// Stream of radio power transitions.
    async fn radio_events(&self) -> Result<BoxStream<'static, RadioEvent>>;
}
