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

//! BlueZ transport adapter using RFCOMM client sockets.

use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address};
use futures::stream::{BoxStream, StreamExt};
use std::io;
use tracing::{debug, info, warn};

use super::adapter::{BoxedStream, LocalIdentity, RadioEvent, TransportAdapter};
use crate::error::{LinkError, Result};

/// Transport adapter backed by the system BlueZ daemon.
pub struct BluezAdapter {
    adapter: Option<Adapter>,
    channel: u8,
}

impl BluezAdapter {
    /// Open the default adapter.
    ///
    /// A missing daemon or adapter yields an unavailable adapter rather than
    /// an error, so callers can report it as an event.
    pub async fn new(channel: u8) -> Self {
        let adapter = match Self::open_default().await {
            Ok(adapter) => {
                info!("Using Bluetooth adapter: {}", adapter.name());
                Some(adapter)
            }
            Err(e) => {
                warn!("No usable Bluetooth adapter: {}", e);
                None
            }
        };

        Self { adapter, channel }
    }

    async fn open_default() -> bluer::Result<Adapter> {
        let session = bluer::Session::new().await?;
        debug!("BlueZ session created");
        session.default_adapter().await
    }

    fn adapter(&self) -> Result<&Adapter> {
        self.adapter.as_ref().ok_or(LinkError::AdapterUnavailable)
    }

    fn parse_address(address: &str) -> io::Result<Address> {
        address.parse::<Address>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid Bluetooth address {}: {}", address, e),
            )
        })
    }
}

fn bluer_error(e: bluer::Error) -> LinkError {
    LinkError::Io(io::Error::other(e.to_string()))
}

#[async_trait]
impl TransportAdapter for BluezAdapter {
    fn is_available(&self) -> bool {
        self.adapter.is_some()
    }

    async fn is_enabled(&self) -> bool {
        match &self.adapter {
            Some(adapter) => adapter.is_powered().await.unwrap_or(false),
            None => false,
        }
    }

    async fn request_enable(&self) -> Result<()> {
        let adapter = self.adapter()?;
        info!("Powering on Bluetooth adapter...");
        adapter.set_powered(true).await.map_err(bluer_error)
    }

    async fn open_connection(&self, address: &str) -> io::Result<BoxedStream> {
        let adapter = self
            .adapter
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no Bluetooth adapter"))?;
        let remote = Self::parse_address(address)?;

        debug!(
            "Opening RFCOMM channel {} to {} via {}",
            self.channel,
            remote,
            adapter.name()
        );
        let stream = Stream::connect(SocketAddr::new(remote, self.channel)).await?;
        Ok(Box::new(stream))
    }

    async fn local_identity(&self) -> Result<LocalIdentity> {
        let adapter = self.adapter()?;
        let name = adapter.alias().await.map_err(bluer_error)?;
        let address = adapter.address().await.map_err(bluer_error)?;
        Ok(LocalIdentity::new(name, address.to_string()))
    }

    async fn remote_name(&self, address: &str) -> Option<String> {
        let adapter = self.adapter.as_ref()?;
        let remote = Self::parse_address(address).ok()?;
        let device = adapter.device(remote).ok()?;
        device.name().await.ok().flatten()
    }

    async fn radio_events(&self) -> Result<BoxStream<'static, RadioEvent>> {
        let adapter = self.adapter()?;
        let events = adapter.events().await.map_err(bluer_error)?;

        // BlueZ only reports the settled power state.
        let radio = events.filter_map(|event| async move {
            match event {
                AdapterEvent::PropertyChanged(AdapterProperty::Powered(true)) => {
                    Some(RadioEvent::Enabled)
                }
                AdapterEvent::PropertyChanged(AdapterProperty::Powered(false)) => {
                    Some(RadioEvent::Disabled)
                }
                _ => None,
            }
        });

        Ok(radio.boxed())
    }
}
