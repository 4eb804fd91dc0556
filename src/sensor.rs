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

//! Particulate sensor readings.

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::SensorConfig;
use crate::error::Result;
use crate::session::SessionManager;

/// Placeholder shown for a missing value.
pub const NOT_AVAILABLE: &str = "N/A";

/// One reply from the sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    /// PM2.5 concentration in µg/m³.
    pub pm25: Option<f32>,
    /// PM10 concentration in µg/m³, when the sensor reports it.
    pub pm10: Option<f32>,
    /// Reply text as received.
    pub raw: String,
    pub taken_at: DateTime<Local>,
}

impl SensorReading {
    /// Parse a reply such as `24.50` or `24.50,31.20`.
    ///
    /// Values are separated by commas or whitespace; the first is PM2.5 and
    /// the second PM10. Text that does not parse is kept in `raw` only.
    pub fn parse(line: &str) -> Self {
        let raw = line.trim().to_string();
        let mut values = raw
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| token.parse::<f32>().ok());

        let pm25 = values.next().flatten();
        let pm10 = values.next().flatten();
        if pm25.is_none() {
            warn!("Unrecognised sensor reply: {:?}", raw);
        }

        Self {
            pm25,
            pm10,
            raw,
            taken_at: Local::now(),
        }
    }

    /// PM2.5 for display, raw text when it did not parse.
    pub fn pm25_label(&self) -> String {
        match self.pm25 {
            Some(value) => format!("{:.1}", value),
            None if !self.raw.is_empty() => self.raw.clone(),
            None => NOT_AVAILABLE.to_string(),
        }
    }

    /// PM10 for display.
    pub fn pm10_label(&self) -> String {
        self.pm10
            .map(|value| format!("{:.1}", value))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }
}

/// Request a reading and acknowledge it.
///
/// Sends the request command, reads the reply line, then sends the
/// acknowledgement, all as one exchange on the session. No reply is
/// acknowledged when the read fails.
pub async fn inquire(manager: &SessionManager, config: &SensorConfig) -> Result<SensorReading> {
    let line = manager
        .transact_acked(&config.request_command, &config.ack_command)
        .await?;
    let reading = SensorReading::parse(&line);
    debug!("Reading: pm25={:?} pm10={:?}", reading.pm25, reading.pm10);
    Ok(reading)
}
