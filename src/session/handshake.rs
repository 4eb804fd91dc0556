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

//! Session handshake strategies.

use async_trait::async_trait;
use tracing::info;

use super::channel::CommandChannel;
use crate::bluetooth::LocalIdentity;
use crate::error::Result;

/// Runs once per connection, between opening the stream and entering Ready.
#[async_trait]
pub trait Handshake: Send + Sync {
    async fn perform(&self, channel: &mut CommandChannel, local: &LocalIdentity) -> Result<()>;
}

/// Announces the local adapter with a `SYNC` line and expects no reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncHandshake;

impl SyncHandshake {
    /// The sync line without its terminator.
    pub fn message(local: &LocalIdentity) -> String {
        format!("SYNC from {} {}", local.name, local.address)
    }
}

#[async_trait]
impl Handshake for SyncHandshake {
    async fn perform(&self, channel: &mut CommandChannel, local: &LocalIdentity) -> Result<()> {
        let message = Self::message(local);
        channel.write_line(&message).await?;
        info!("Sync sent: {}", message);
        Ok(())
    }
}
