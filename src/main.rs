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

//! PM25 Link command-line monitor.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pm25_link::sensor;
use pm25_link::state::{MonitorState, StateObserver};
use pm25_link::{AdapterState, BluezAdapter, Config, LinkError, SessionManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pm25_link=info".parse()?),
        )
        .init();

    info!("Starting PM25 Link v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    let address = std::env::args()
        .nth(1)
        .or_else(|| config.bluetooth.device_address.clone());

    let adapter = Arc::new(BluezAdapter::new(config.bluetooth.rfcomm_channel).await);
    let (manager, events) = SessionManager::new(adapter, config.session.clone()).await;

    // Deliver session events on their own task
    let state = MonitorState::new();
    let observer_state = state.clone();
    tokio::spawn(async move {
        let mut observer = StateObserver::new(observer_state);
        events.run(&mut observer).await;
    });

    if !manager.is_available() {
        bail!("No Bluetooth adapter available");
    }

    if let Err(e) = manager.watch_radio().await {
        warn!("Radio state events unavailable: {}", e);
    }

    if manager.request_enable().await? {
        info!("Waiting for Bluetooth to power on...");
        let mut status = manager.subscribe();
        let powered = tokio::time::timeout(
            config.session.connect_timeout(),
            status.wait_for(|status| status.adapter == AdapterState::Enabled),
        )
        .await;
        if !matches!(powered, Ok(Ok(_))) {
            bail!("Bluetooth adapter did not power on");
        }
    }

    let Some(address) = address else {
        bail!("No sensor address: pass one as an argument or set bluetooth.device_address");
    };

    manager.connect(&address).await?;
    info!("Ready. Polling {} every {}ms", address, config.sensor.poll_interval_ms);

    let mut ticker = tokio::time::interval(config.sensor.poll_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !manager.is_connected() {
                    warn!("Sensor no longer connected");
                    break;
                }
                match sensor::inquire(&manager, &config.sensor).await {
                    Ok(reading) => {
                        info!(
                            "PM2.5 {} | PM10 {} | {}",
                            reading.pm25_label(),
                            reading.pm10_label(),
                            state.target_label()
                        );
                        println!("{}", serde_json::to_string(&reading)?);
                        state.set_reading(reading);
                    }
                    Err(e @ LinkError::Timeout { .. }) => {
                        warn!("No reply from sensor: {}", e);
                    }
                    Err(e) => {
                        error!("Reading failed: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    manager.shutdown().await;
    info!("PM25 Link stopped");
    Ok(())
}
