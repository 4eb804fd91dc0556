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

//! Application state management.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::bluetooth::AdapterState;
use crate::events::SessionObserver;
use crate::sensor::{SensorReading, NOT_AVAILABLE};

/// Shared monitor state.
#[derive(Debug)]
pub struct MonitorState {
    /// Current radio state.
    pub adapter: RwLock<AdapterState>,

    /// Connected sensor as "name (address)".
    pub target: RwLock<Option<String>>,

    /// Most recent reading.
    pub last_reading: RwLock<Option<SensorReading>>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            adapter: RwLock::new(AdapterState::Disabled),
            target: RwLock::new(None),
            last_reading: RwLock::new(None),
        }
    }
}

impl MonitorState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_adapter(&self, state: AdapterState) {
        *self.adapter.write() = state;
    }

    pub fn get_adapter(&self) -> AdapterState {
        *self.adapter.read()
    }

    pub fn set_target(&self, name: &str, address: &str) {
        *self.target.write() = Some(format!("{} ({})", name, address));
    }

    pub fn clear_target(&self) {
        *self.target.write() = None;
    }

    pub fn target_label(&self) -> String {
        self.target
            .read()
            .clone()
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }

    pub fn set_reading(&self, reading: SensorReading) {
        *self.last_reading.write() = Some(reading);
    }

    pub fn get_reading(&self) -> Option<SensorReading> {
        self.last_reading.read().clone()
    }

    /// Drop everything that depends on a live radio.
    pub fn reset_readings(&self) {
        *self.last_reading.write() = None;
        self.clear_target();
    }
}

/// Keeps a [`MonitorState`] in step with session events.
pub struct StateObserver {
    state: Arc<MonitorState>,
}

impl StateObserver {
    pub fn new(state: Arc<MonitorState>) -> Self {
        Self { state }
    }
}

impl SessionObserver for StateObserver {
    fn adapter_enabling(&mut self) {
        self.state.set_adapter(AdapterState::Enabling);
    }

    fn adapter_enabled(&mut self) {
        info!("Bluetooth enabled");
        self.state.set_adapter(AdapterState::Enabled);
    }

    fn adapter_disabling(&mut self) {
        self.state.set_adapter(AdapterState::Disabling);
    }

    fn adapter_disabled(&mut self) {
        info!("Bluetooth not enabled");
        self.state.set_adapter(AdapterState::Disabled);
        self.state.reset_readings();
    }

    fn adapter_unavailable(&mut self) {
        info!("No Bluetooth modem found");
        self.state.set_adapter(AdapterState::Unavailable);
    }

    fn connected_to(&mut self, name: &str, address: &str) {
        self.state.set_target(name, address);
    }

    fn disconnected(&mut self, _address: &str) {
        self.state.clear_target();
    }
}
