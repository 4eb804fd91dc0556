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

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "pm25-link";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Session timeouts and limits.
    pub session: SessionConfig,

    /// Sensor polling settings.
    pub sensor: SensorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// RFCOMM channel the sensor's serial port profile listens on.
    pub rfcomm_channel: u8,

    /// Sensor to connect to at startup.
    pub device_address: Option<String>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            rfcomm_channel: 1,
            device_address: None,
        }
    }
}

/// Timeouts and limits applied to every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time allowed for opening the stream.
    pub connect_timeout_ms: u64,

    /// Time allowed for a single response line.
    pub read_timeout_ms: u64,

    /// Time allowed for writing and flushing a command.
    pub write_timeout_ms: u64,

    /// Longest accepted response line, terminator excluded.
    pub max_line_len: usize,

    /// Tear the session down when the radio powers off.
    pub disconnect_on_radio_off: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            read_timeout_ms: 3_000,
            write_timeout_ms: 3_000,
            max_line_len: 64,
            disconnect_on_radio_off: false,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Delay between readings in milliseconds.
    pub poll_interval_ms: u64,

    /// Command asking the sensor for a reading.
    pub request_command: String,

    /// Command acknowledging a reading.
    pub ack_command: String,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            request_command: "t".to_string(),
            ack_command: "ok".to_string(),
        }
    }
}

impl SensorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
