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

//! Session event queue and observer dispatch.
//!
//! Producers (the session worker and radio watchers) push into an unbounded
//! single-consumer queue. The owner of the [`EventReceiver`] drains it on its
//! own task and forwards each event to a [`SessionObserver`], so callbacks all
//! run on one context and in the order the events were produced.

use tokio::sync::mpsc;
use tracing::debug;

use crate::bluetooth::RadioEvent;

/// Events emitted by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Radio is powering up.
    AdapterEnabling,
    /// Radio is powered.
    AdapterEnabled,
    /// Radio is powering down.
    AdapterDisabling,
    /// Radio is off.
    AdapterDisabled,
    /// No radio hardware present.
    AdapterUnavailable,
    /// Handshake sent; session is ready.
    ConnectedTo { name: String, address: String },
    /// Connection establishment failed.
    ConnectFailed { address: String, reason: String },
    /// An established session was torn down.
    Disconnected { address: String },
}

impl From<RadioEvent> for SessionEvent {
    fn from(event: RadioEvent) -> Self {
        match event {
            RadioEvent::Enabling => SessionEvent::AdapterEnabling,
            RadioEvent::Enabled => SessionEvent::AdapterEnabled,
            RadioEvent::Disabling => SessionEvent::AdapterDisabling,
            RadioEvent::Disabled => SessionEvent::AdapterDisabled,
        }
    }
}

/// Callbacks for the application layer. All methods default to no-ops.
pub trait SessionObserver {
    fn adapter_enabling(&mut self) {}
    fn adapter_enabled(&mut self) {}
    fn adapter_disabling(&mut self) {}
    fn adapter_disabled(&mut self) {}
    fn adapter_unavailable(&mut self) {}
    fn connected_to(&mut self, _name: &str, _address: &str) {}
    fn connect_failed(&mut self, _address: &str, _reason: &str) {}
    fn disconnected(&mut self, _address: &str) {}
}

/// Producer side of the event queue.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventNotifier {
    /// Create a notifier and its receiver.
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, EventReceiver { rx })
    }

    /// Queue an event. Events sent after the receiver is gone are discarded.
    pub fn emit(&self, event: SessionEvent) {
        debug!("Event: {:?}", event);
        let _ = self.tx.send(event);
    }
}

/// Consumer side of the event queue.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventReceiver {
    /// Wait for the next event; `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }

    /// Take every event queued so far.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Deliver every queued event to `observer` without waiting.
    ///
    /// Returns the number of events delivered.
    pub fn dispatch_pending<O: SessionObserver + ?Sized>(&mut self, observer: &mut O) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.try_recv() {
            dispatch(&event, observer);
            delivered += 1;
        }
        delivered
    }

    /// Deliver events to `observer` until all producers are dropped.
    pub async fn run<O: SessionObserver + ?Sized>(mut self, observer: &mut O) {
        while let Some(event) = self.recv().await {
            dispatch(&event, observer);
        }
        debug!("Event queue closed");
    }
}

/// Forward a single event to the matching observer callback.
pub fn dispatch<O: SessionObserver + ?Sized>(event: &SessionEvent, observer: &mut O) {
    match event {
        SessionEvent::AdapterEnabling => observer.adapter_enabling(),
        SessionEvent::AdapterEnabled => observer.adapter_enabled(),
        SessionEvent::AdapterDisabling => observer.adapter_disabling(),
        SessionEvent::AdapterDisabled => observer.adapter_disabled(),
        SessionEvent::AdapterUnavailable => observer.adapter_unavailable(),
        SessionEvent::ConnectedTo { name, address } => observer.connected_to(name, address),
        SessionEvent::ConnectFailed { address, reason } => {
            observer.connect_failed(address, reason)
        }
        SessionEvent::Disconnected { address } => observer.disconnected(address),
    }
}
