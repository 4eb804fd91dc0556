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

//! Sensor session management.
//!
//! A [`SessionManager`] owns at most one connection to a sensor. Every
//! operation is queued to a single worker task that owns the session and the
//! adapter state, so connects, handshakes, writes and reads never overlap.
//! Lifecycle changes are published on a watch channel and reported to the
//! application through the [`EventReceiver`] returned at construction.

mod channel;
mod handshake;

pub use channel::{CommandChannel, LINE_TERMINATOR};
pub use handshake::{Handshake, SyncHandshake};

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bluetooth::{AdapterState, BoxedStream, RadioEvent, TransportAdapter};
use crate::config::SessionConfig;
use crate::error::{LinkError, Result};
use crate::events::{EventNotifier, EventReceiver, SessionEvent};
use channel::interrupted;

/// Display name used when the remote device does not report one.
pub const UNKNOWN_DEVICE_NAME: &str = "unknown";

/// Lifecycle of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Connecting,
    Handshaking,
    Ready,
    Closing,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "Idle",
            LifecycleState::Connecting => "Connecting...",
            LifecycleState::Handshaking => "Handshaking...",
            LifecycleState::Ready => "Ready",
            LifecycleState::Closing => "Closing...",
        }
    }
}

/// The device a session is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDevice {
    pub name: String,
    pub address: String,
}

/// Snapshot published by the worker after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub lifecycle: LifecycleState,
    pub adapter: AdapterState,
    pub remote: Option<RemoteDevice>,
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Connect { address: String, reply: Reply<()> },
    Disconnect { reply: oneshot::Sender<()> },
    Send { text: String, reply: Reply<()> },
    Receive { reply: Reply<String> },
    Transact {
        text: String,
        ack: Option<String>,
        reply: Reply<String>,
    },
    RequestEnable { reply: Reply<bool> },
    Radio(RadioEvent),
}

/// Handle to the session worker.
pub struct SessionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
    interrupt: Arc<watch::Sender<bool>>,
    adapter: Arc<dyn TransportAdapter>,
    worker: Mutex<Option<JoinHandle<()>>>,
    radio_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Start a manager using the `SYNC` handshake.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn new(
        adapter: Arc<dyn TransportAdapter>,
        config: SessionConfig,
    ) -> (Self, EventReceiver) {
        Self::with_handshake(adapter, config, Box::new(SyncHandshake)).await
    }

    /// Start a manager with a custom handshake.
    pub async fn with_handshake(
        adapter: Arc<dyn TransportAdapter>,
        config: SessionConfig,
        handshake: Box<dyn Handshake>,
    ) -> (Self, EventReceiver) {
        let (notifier, events) = EventNotifier::channel();

        let adapter_state = if !adapter.is_available() {
            warn!("No Bluetooth hardware available");
            notifier.emit(SessionEvent::AdapterUnavailable);
            AdapterState::Unavailable
        } else if adapter.is_enabled().await {
            AdapterState::Enabled
        } else {
            AdapterState::Disabled
        };

        let (status_tx, status_rx) = watch::channel(SessionStatus {
            lifecycle: LifecycleState::Idle,
            adapter: adapter_state,
            remote: None,
        });
        let (interrupt_tx, interrupt_rx) = watch::channel(false);
        let interrupt_tx = Arc::new(interrupt_tx);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let worker = SessionWorker {
            adapter: adapter.clone(),
            handshake,
            config,
            notifier,
            status: status_tx,
            interrupt_tx: interrupt_tx.clone(),
            interrupt_rx,
            session: None,
            commands: command_rx,
        };
        let worker = tokio::spawn(worker.run());

        let manager = Self {
            commands: command_tx,
            status: status_rx,
            interrupt: interrupt_tx,
            adapter,
            worker: Mutex::new(Some(worker)),
            radio_task: Mutex::new(None),
        };
        (manager, events)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| LinkError::ManagerClosed)?;
        response.await.map_err(|_| LinkError::ManagerClosed)?
    }

    /// Connect to the device at `address`, replacing any current session.
    ///
    /// Failures are reported once, both here and as a
    /// [`SessionEvent::ConnectFailed`]. No retry is attempted.
    pub async fn connect(&self, address: &str) -> Result<()> {
        let address = address.to_string();
        self.request(|reply| Command::Connect { address, reply }).await
    }

    /// Tear down the current session, interrupting any operation in flight.
    ///
    /// Safe to call at any time; never fails.
    pub async fn disconnect(&self) {
        self.interrupt.send_replace(true);

        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).is_err() {
            return;
        }
        let _ = done.await;
    }

    /// Send a command line.
    pub async fn send(&self, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let text = text.to_string();
        self.request(|reply| Command::Send { text, reply }).await
    }

    /// Read the next response line.
    pub async fn receive(&self) -> Result<String> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.request(|reply| Command::Receive { reply }).await
    }

    /// Send a command and read its response with no other command in between.
    ///
    /// Input left over from earlier exchanges is dropped before sending, so
    /// a late reply is never returned for this command.
    pub async fn transact(&self, text: &str) -> Result<String> {
        self.exchange(text, None).await
    }

    /// Like [`transact`](Self::transact), then send `ack` once the response
    /// has arrived, still with no other command in between.
    pub async fn transact_acked(&self, text: &str, ack: &str) -> Result<String> {
        self.exchange(text, Some(ack.to_string())).await
    }

    async fn exchange(&self, text: &str, ack: Option<String>) -> Result<String> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let text = text.to_string();
        self.request(|reply| Command::Transact { text, ack, reply }).await
    }

    /// Ask the host to power the radio on.
    ///
    /// Returns `false` when the radio is already enabled.
    pub async fn request_enable(&self) -> Result<bool> {
        self.request(|reply| Command::RequestEnable { reply }).await
    }

    /// Feed a radio transition observed by the host.
    pub fn notify_radio(&self, event: RadioEvent) {
        let _ = self.commands.send(Command::Radio(event));
    }

    /// Forward the adapter's own radio events to the worker.
    ///
    /// Replaces any previous watcher.
    pub async fn watch_radio(&self) -> Result<()> {
        let mut events = self.adapter.radio_events().await?;
        let commands = self.commands.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if commands.send(Command::Radio(event)).is_err() {
                    break;
                }
            }
            debug!("Radio event stream ended");
        });

        if let Some(previous) = self.radio_task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Latest published status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.status.borrow().lifecycle
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.status.borrow().adapter
    }

    /// True iff the session is ready for commands.
    pub fn is_connected(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    pub fn is_available(&self) -> bool {
        self.adapter.is_available()
    }

    /// Disconnect and wait for the worker to stop.
    pub async fn shutdown(self) {
        self.disconnect().await;
        if let Some(task) = self.radio_task.lock().take() {
            task.abort();
        }

        let worker = self.worker.lock().take();
        drop(self);
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(task) = self.radio_task.lock().take() {
            task.abort();
        }
    }
}

struct Session {
    remote: RemoteDevice,
    channel: CommandChannel,
}

struct SessionWorker {
    adapter: Arc<dyn TransportAdapter>,
    handshake: Box<dyn Handshake>,
    config: SessionConfig,
    notifier: EventNotifier,
    status: watch::Sender<SessionStatus>,
    interrupt_tx: Arc<watch::Sender<bool>>,
    interrupt_rx: watch::Receiver<bool>,
    session: Option<Session>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl SessionWorker {
    async fn run(mut self) {
        debug!("Session worker started");

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Connect { address, reply } => {
                    let result = self.connect(address).await;
                    let _ = reply.send(result);
                }
                Command::Disconnect { reply } => {
                    self.teardown().await;
                    self.interrupt_tx.send_replace(false);
                    let _ = reply.send(());
                }
                Command::Send { text, reply } => {
                    let result = self.send(&text).await;
                    let _ = reply.send(result);
                }
                Command::Receive { reply } => {
                    let result = self.receive().await;
                    let _ = reply.send(result);
                }
                Command::Transact { text, ack, reply } => {
                    let result = self.transact(&text, ack.as_deref()).await;
                    let _ = reply.send(result);
                }
                Command::RequestEnable { reply } => {
                    let result = self.request_enable().await;
                    let _ = reply.send(result);
                }
                Command::Radio(event) => self.on_radio(event).await,
            }
        }

        self.teardown().await;
        debug!("Session worker stopped");
    }

    fn set_lifecycle(&self, lifecycle: LifecycleState, remote: Option<RemoteDevice>) {
        self.status.send_modify(|status| {
            debug!(
                "Session state: {} -> {}",
                status.lifecycle.as_str(),
                lifecycle.as_str()
            );
            status.lifecycle = lifecycle;
            status.remote = remote;
        });
    }

    async fn check_adapter(&self) -> Result<()> {
        if !self.adapter.is_available() {
            return Err(LinkError::AdapterUnavailable);
        }
        if !self.adapter.is_enabled().await {
            return Err(LinkError::AdapterDisabled);
        }
        Ok(())
    }

    async fn connect(&mut self, address: String) -> Result<()> {
        self.teardown().await;

        if let Err(e) = self.check_adapter().await {
            self.connect_failed(&address, &e);
            return Err(e);
        }

        let name = self
            .adapter
            .remote_name(&address)
            .await
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
        let remote = RemoteDevice {
            name,
            address: address.clone(),
        };

        self.set_lifecycle(LifecycleState::Connecting, Some(remote.clone()));
        info!("Connecting to {} ({})", remote.name, remote.address);

        let stream = match self.open_stream(&address).await {
            Ok(stream) => stream,
            Err(e) => {
                self.connect_failed(&address, &e);
                return Err(e);
            }
        };

        self.set_lifecycle(LifecycleState::Handshaking, Some(remote.clone()));
        let mut channel = CommandChannel::new(stream, &self.config, self.interrupt_rx.clone());

        let handshake = match self.adapter.local_identity().await {
            Ok(local) => self.handshake.perform(&mut channel, &local).await,
            Err(e) => Err(e),
        };

        if let Err(e) = handshake {
            warn!("Handshake with {} failed: {}", address, e);
            channel.close().await;
            let err = match e {
                LinkError::Interrupted => LinkError::Interrupted,
                other => LinkError::ConnectFailed {
                    address: address.clone(),
                    reason: other.to_string(),
                },
            };
            self.connect_failed(&address, &err);
            return Err(err);
        }

        self.session = Some(Session {
            remote: remote.clone(),
            channel,
        });
        info!("Connected to {} ({})", remote.name, remote.address);
        self.notifier.emit(SessionEvent::ConnectedTo {
            name: remote.name.clone(),
            address: remote.address.clone(),
        });
        self.set_lifecycle(LifecycleState::Ready, Some(remote));
        Ok(())
    }

    async fn open_stream(&self, address: &str) -> Result<BoxedStream> {
        let connect_timeout = self.config.connect_timeout();
        let mut interrupt = self.interrupt_rx.clone();

        tokio::select! {
            biased;
            _ = interrupted(&mut interrupt) => Err(LinkError::Interrupted),
            result = tokio::time::timeout(connect_timeout, self.adapter.open_connection(address)) => {
                match result {
                    Ok(Ok(stream)) => Ok(stream),
                    Ok(Err(e)) => Err(LinkError::ConnectFailed {
                        address: address.to_string(),
                        reason: e.to_string(),
                    }),
                    Err(_) => Err(LinkError::Timeout {
                        operation: "connect",
                        timeout_ms: self.config.connect_timeout_ms,
                    }),
                }
            }
        }
    }

    fn connect_failed(&self, address: &str, error: &LinkError) {
        warn!("Connecting to {} failed: {}", address, error);
        self.notifier.emit(SessionEvent::ConnectFailed {
            address: address.to_string(),
            reason: error.to_string(),
        });
        self.set_lifecycle(LifecycleState::Idle, None);
    }

    /// Close the current session if there is one. Returns whether it existed.
    async fn teardown(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };

        let Session { remote, channel } = session;
        self.set_lifecycle(LifecycleState::Closing, Some(remote.clone()));
        info!("Disconnecting from {} ({})", remote.name, remote.address);

        channel.close().await;

        self.notifier.emit(SessionEvent::Disconnected {
            address: remote.address,
        });
        self.set_lifecycle(LifecycleState::Idle, None);
        true
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        let session = self.session.as_mut().ok_or(LinkError::NotConnected)?;
        let result = session.channel.write_line(text).await;
        self.check_io(result).await
    }

    async fn receive(&mut self) -> Result<String> {
        let session = self.session.as_mut().ok_or(LinkError::NotConnected)?;
        let result = session.channel.read_line().await;
        self.check_io(result).await
    }

    async fn transact(&mut self, text: &str, ack: Option<&str>) -> Result<String> {
        if let Some(session) = self.session.as_mut() {
            session.channel.discard_pending();
        }

        self.send(text).await?;
        let line = self.receive().await?;
        if let Some(ack) = ack {
            self.send(ack).await?;
        }
        Ok(line)
    }

    /// A closed stream ends the session; other failures leave it to the caller.
    async fn check_io<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(LinkError::Closed) = result {
            warn!("Sensor closed the connection");
            self.teardown().await;
        }
        result
    }

    async fn request_enable(&mut self) -> Result<bool> {
        if !self.adapter.is_available() {
            return Err(LinkError::AdapterUnavailable);
        }
        if self.adapter.is_enabled().await {
            return Ok(false);
        }
        self.adapter.request_enable().await?;
        Ok(true)
    }

    async fn on_radio(&mut self, event: RadioEvent) {
        let adapter = event.resulting_state();
        info!("Bluetooth state change received: {}", adapter.as_str());
        self.notifier.emit(event.into());
        self.status.send_modify(|status| status.adapter = adapter);

        if event.is_power_down() && self.config.disconnect_on_radio_off && self.teardown().await {
            info!("Session closed because the radio is powering down");
        }
    }
}
