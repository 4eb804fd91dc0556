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

//! In-memory transport adapter for tests and demos.
//!
//! Each accepted connection is a `tokio::io::duplex` pair; the device side is
//! handed out as a [`MockPeer`] through [`MockAdapter::accept_peer`].

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;

use super::adapter::{BoxedStream, LocalIdentity, RadioEvent, TransportAdapter};
use crate::error::{LinkError, Result};

const DUPLEX_BUFFER: usize = 1024;

/// How a scripted device reacts to a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBehavior {
    /// Accept and hand the device end to the test.
    Accept,
    /// Fail immediately with `ConnectionRefused`.
    Refuse,
    /// Never complete the connection.
    Hang,
    /// Accept, then drop the device end so the first write fails.
    DropOnOpen,
}

struct MockDevice {
    name: Option<String>,
    behavior: PeerBehavior,
}

/// Device side of an accepted mock connection.
pub struct MockPeer {
    pub address: String,
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl MockPeer {
    fn new(address: String, stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            address,
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Read one raw line including its terminator; `None` on EOF.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        match self.reader.read_line(&mut line).await? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    }

    /// Write raw bytes to the host side.
    pub async fn write(&mut self, data: &str) -> io::Result<()> {
        self.writer.write_all(data.as_bytes()).await?;
        self.writer.flush().await
    }
}

/// Scriptable adapter with a fixed local identity.
pub struct MockAdapter {
    available: bool,
    enabled: AtomicBool,
    identity: LocalIdentity,
    devices: Mutex<HashMap<String, MockDevice>>,
    peer_tx: mpsc::UnboundedSender<MockPeer>,
    peer_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockPeer>>,
    radio_tx: mpsc::UnboundedSender<RadioEvent>,
    radio_rx: Mutex<Option<mpsc::UnboundedReceiver<RadioEvent>>>,
    enable_requests: AtomicUsize,
}

impl MockAdapter {
    /// Create an available, enabled adapter.
    pub fn new(identity: LocalIdentity) -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (radio_tx, radio_rx) = mpsc::unbounded_channel();
        Self {
            available: true,
            enabled: AtomicBool::new(true),
            identity,
            devices: Mutex::new(HashMap::new()),
            peer_tx,
            peer_rx: tokio::sync::Mutex::new(peer_rx),
            radio_tx,
            radio_rx: Mutex::new(Some(radio_rx)),
            enable_requests: AtomicUsize::new(0),
        }
    }

    /// Create an adapter that reports no radio hardware.
    pub fn unavailable() -> Self {
        let mut adapter = Self::new(LocalIdentity::new("", ""));
        adapter.available = false;
        adapter.enabled = AtomicBool::new(false);
        adapter
    }

    /// Set whether the radio is powered.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Register a device reachable at `address`.
    pub fn add_device(&self, address: &str, name: Option<&str>, behavior: PeerBehavior) {
        self.devices.lock().insert(
            address.to_string(),
            MockDevice {
                name: name.map(str::to_string),
                behavior,
            },
        );
    }

    /// Wait for the next accepted connection.
    pub async fn accept_peer(&self) -> Option<MockPeer> {
        self.peer_rx.lock().await.recv().await
    }

    /// Push a radio transition as the host would broadcast it.
    pub fn emit_radio(&self, event: RadioEvent) {
        match event {
            RadioEvent::Enabled => self.set_enabled(true),
            RadioEvent::Disabled => self.set_enabled(false),
            _ => {}
        }
        let _ = self.radio_tx.send(event);
    }

    /// Number of `request_enable` calls seen.
    pub fn enable_requests(&self) -> usize {
        self.enable_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportAdapter for MockAdapter {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn is_enabled(&self) -> bool {
        self.available && self.enabled.load(Ordering::SeqCst)
    }

    async fn request_enable(&self) -> Result<()> {
        if !self.available {
            return Err(LinkError::AdapterUnavailable);
        }
        self.enable_requests.fetch_add(1, Ordering::SeqCst);
        self.emit_radio(RadioEvent::Enabling);
        self.emit_radio(RadioEvent::Enabled);
        Ok(())
    }

    async fn open_connection(&self, address: &str) -> io::Result<BoxedStream> {
        let behavior = self
            .devices
            .lock()
            .get(address)
            .map(|device| device.behavior)
            .unwrap_or(PeerBehavior::Refuse);

        match behavior {
            PeerBehavior::Accept => {
                let (host, device) = tokio::io::duplex(DUPLEX_BUFFER);
                let _ = self.peer_tx.send(MockPeer::new(address.to_string(), device));
                Ok(Box::new(host))
            }
            PeerBehavior::DropOnOpen => {
                let (host, _device) = tokio::io::duplex(DUPLEX_BUFFER);
                Ok(Box::new(host))
            }
            PeerBehavior::Refuse => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} refused the connection", address),
            )),
            PeerBehavior::Hang => std::future::pending().await,
        }
    }

    async fn local_identity(&self) -> Result<LocalIdentity> {
        if !self.available {
            return Err(LinkError::AdapterUnavailable);
        }
        Ok(self.identity.clone())
    }

    async fn remote_name(&self, address: &str) -> Option<String> {
        self.devices
            .lock()
            .get(address)
            .and_then(|device| device.name.clone())
    }

    async fn radio_events(&self) -> Result<BoxStream<'static, RadioEvent>> {
        let rx = self
            .radio_rx
            .lock()
            .take()
            .ok_or_else(|| LinkError::Io(io::Error::other("radio events already taken")))?;

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }
}
