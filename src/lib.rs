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

//! Bluetooth serial link to PM2.5/PM10 particulate sensors.
//!
//! [`SessionManager`] connects to a sensor over a [`TransportAdapter`],
//! sends the `SYNC` handshake and exchanges `\r\n`-terminated command and
//! response lines. Lifecycle changes are delivered through an
//! [`EventReceiver`] to a [`SessionObserver`].

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod events;
pub mod sensor;
pub mod session;
pub mod state;

pub use bluetooth::{AdapterState, BluezAdapter, LocalIdentity, RadioEvent, TransportAdapter};
pub use config::{Config, SessionConfig};
pub use error::{LinkError, Result};
pub use events::{EventReceiver, SessionEvent, SessionObserver};
pub use sensor::SensorReading;
pub use session::{LifecycleState, SessionManager, SessionStatus};
