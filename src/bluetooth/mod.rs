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

//! Bluetooth transport layer.
//!
//! Defines the adapter capabilities the session manager relies on, with a
//! BlueZ RFCOMM implementation and an in-memory mock.

mod adapter;
mod bluez;
pub mod mock;

pub use adapter::{
    AdapterState, BoxedStream, DuplexStream, LocalIdentity, RadioEvent, TransportAdapter,
};
pub use bluez::BluezAdapter;
pub use mock::{MockAdapter, MockPeer, PeerBehavior};
