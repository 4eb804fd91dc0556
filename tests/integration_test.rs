//! Integration tests for the session lifecycle against a scripted sensor.

use std::sync::Arc;
use std::time::Duration;

use pm25_link::bluetooth::{LocalIdentity, MockAdapter, PeerBehavior, RadioEvent};
use pm25_link::config::{SensorConfig, SessionConfig};
use pm25_link::events::{EventReceiver, SessionEvent};
use pm25_link::sensor;
use pm25_link::{AdapterState, LifecycleState, LinkError, SessionManager};

const SENSOR: &str = "AA:BB:CC:DD:EE:FF";
const SECOND_SENSOR: &str = "11:22:33:44:55:66";
const REFUSING: &str = "AA:BB:CC:DD:EE:01";
const SILENT: &str = "AA:BB:CC:DD:EE:02";
const BROKEN: &str = "AA:BB:CC:DD:EE:03";

fn test_config() -> SessionConfig {
    SessionConfig {
        connect_timeout_ms: 200,
        read_timeout_ms: 150,
        write_timeout_ms: 150,
        ..SessionConfig::default()
    }
}

fn scripted_adapter() -> Arc<MockAdapter> {
    let adapter = MockAdapter::new(LocalIdentity::new("DeviceA", "00:11:22:33:44:55"));
    adapter.add_device(SENSOR, Some("PM25 Sensor"), PeerBehavior::Accept);
    adapter.add_device(SECOND_SENSOR, None, PeerBehavior::Accept);
    adapter.add_device(REFUSING, Some("Refuser"), PeerBehavior::Refuse);
    adapter.add_device(SILENT, Some("Silent"), PeerBehavior::Hang);
    adapter.add_device(BROKEN, Some("Broken"), PeerBehavior::DropOnOpen);
    Arc::new(adapter)
}

async fn start(adapter: &Arc<MockAdapter>, config: SessionConfig) -> (SessionManager, EventReceiver) {
    SessionManager::new(adapter.clone(), config).await
}

fn connected_events(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, SessionEvent::ConnectedTo { .. }))
        .count()
}

fn connect_failures(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, SessionEvent::ConnectFailed { .. }))
        .count()
}

#[tokio::test]
async fn test_handshake_then_single_connected_event() {
    let adapter = scripted_adapter();
    let (manager, mut events) = start(&adapter, test_config()).await;

    manager.connect(SENSOR).await.unwrap();
    let mut peer = adapter.accept_peer().await.unwrap();

    assert_eq!(
        peer.read_line().await.unwrap().as_deref(),
        Some("SYNC from DeviceA 00:11:22:33:44:55\r\n")
    );
    assert!(manager.is_connected());

    let drained = events.drain();
    assert_eq!(
        drained,
        vec![SessionEvent::ConnectedTo {
            name: "PM25 Sensor".to_string(),
            address: SENSOR.to_string(),
        }]
    );
}

#[tokio::test]
async fn test_unnamed_device_reports_unknown_name() {
    let adapter = scripted_adapter();
    let (manager, mut events) = start(&adapter, test_config()).await;

    manager.connect(SECOND_SENSOR).await.unwrap();
    assert_eq!(
        events.try_recv(),
        Some(SessionEvent::ConnectedTo {
            name: "unknown".to_string(),
            address: SECOND_SENSOR.to_string(),
        })
    );
}

#[tokio::test]
async fn test_refused_connection_returns_to_idle() {
    let adapter = scripted_adapter();
    let (manager, mut events) = start(&adapter, test_config()).await;

    let err = manager.connect(REFUSING).await.unwrap_err();
    assert!(matches!(err, LinkError::ConnectFailed { .. }));
    assert_eq!(manager.state(), LifecycleState::Idle);

    let drained = events.drain();
    assert_eq!(connect_failures(&drained), 1);
    assert_eq!(connected_events(&drained), 0);
}

#[tokio::test]
async fn test_connect_timeout_returns_to_idle() {
    let adapter = scripted_adapter();
    let (manager, mut events) = start(&adapter, test_config()).await;

    let err = manager.connect(SILENT).await.unwrap_err();
    assert!(matches!(
        err,
        LinkError::Timeout {
            operation: "connect",
            ..
        }
    ));
    assert!(err.is_connect_failure());
    assert_eq!(manager.state(), LifecycleState::Idle);
    assert_eq!(connect_failures(&events.drain()), 1);
}

#[tokio::test]
async fn test_failed_handshake_write_returns_to_idle() {
    let adapter = scripted_adapter();
    let (manager, mut events) = start(&adapter, test_config()).await;

    let err = manager.connect(BROKEN).await.unwrap_err();
    assert!(matches!(err, LinkError::ConnectFailed { .. }));
    assert_eq!(manager.state(), LifecycleState::Idle);

    let drained = events.drain();
    assert_eq!(connect_failures(&drained), 1);
    assert_eq!(connected_events(&drained), 0);
}

#[tokio::test]
async fn test_disconnect_while_idle_is_silent() {
    let adapter = scripted_adapter();
    let (manager, mut events) = start(&adapter, test_config()).await;

    manager.disconnect().await;
    manager.disconnect().await;

    assert_eq!(manager.state(), LifecycleState::Idle);
    assert!(events.drain().is_empty());
}

#[tokio::test]
async fn test_reconnect_tears_down_previous_session_first() {
    let adapter = scripted_adapter();
    let (manager, mut events) = start(&adapter, test_config()).await;

    manager.connect(SENSOR).await.unwrap();
    let mut first = adapter.accept_peer().await.unwrap();
    manager.connect(SECOND_SENSOR).await.unwrap();

    // The first sensor sees its sync line, then end of stream.
    assert!(first.read_line().await.unwrap().is_some());
    assert_eq!(first.read_line().await.unwrap(), None);

    let drained = events.drain();
    assert_eq!(
        drained,
        vec![
            SessionEvent::ConnectedTo {
                name: "PM25 Sensor".to_string(),
                address: SENSOR.to_string(),
            },
            SessionEvent::Disconnected {
                address: SENSOR.to_string(),
            },
            SessionEvent::ConnectedTo {
                name: "unknown".to_string(),
                address: SECOND_SENSOR.to_string(),
            },
        ]
    );
    assert_eq!(manager.status().remote.unwrap().address, SECOND_SENSOR);
}

#[tokio::test]
async fn test_commands_outside_ready_fail_fast() {
    let adapter = scripted_adapter();
    let (manager, _events) = start(&adapter, test_config()).await;

    assert!(matches!(manager.send("t").await, Err(LinkError::NotConnected)));
    assert!(matches!(manager.receive().await, Err(LinkError::NotConnected)));
    assert!(matches!(manager.transact("t").await, Err(LinkError::NotConnected)));

    manager.connect(SENSOR).await.unwrap();
    manager.disconnect().await;
    assert!(matches!(manager.send("t").await, Err(LinkError::NotConnected)));
    assert!(matches!(manager.receive().await, Err(LinkError::NotConnected)));
}

#[tokio::test]
async fn test_reading_round_trip() {
    let adapter = scripted_adapter();
    let (manager, _events) = start(&adapter, test_config()).await;
    manager.connect(SENSOR).await.unwrap();
    let mut peer = adapter.accept_peer().await.unwrap();
    peer.read_line().await.unwrap();

    manager.send("t").await.unwrap();
    assert_eq!(peer.read_line().await.unwrap().as_deref(), Some("t\r\n"));

    // A full line, not an eight-byte raw buffer.
    peer.write("24.50\r\n").await.unwrap();
    assert_eq!(manager.receive().await.unwrap(), "24.50");
}

#[tokio::test]
async fn test_read_timeout_keeps_session_ready() {
    let adapter = scripted_adapter();
    let (manager, mut events) = start(&adapter, test_config()).await;
    manager.connect(SENSOR).await.unwrap();
    let mut peer = adapter.accept_peer().await.unwrap();
    peer.read_line().await.unwrap();
    events.drain();

    let err = manager.receive().await.unwrap_err();
    assert!(matches!(
        err,
        LinkError::Timeout {
            operation: "read",
            ..
        }
    ));
    assert!(manager.is_connected());
    assert!(events.drain().is_empty());

    peer.write("25.00\r\n").await.unwrap();
    assert_eq!(manager.receive().await.unwrap(), "25.00");
}

#[tokio::test]
async fn test_remote_close_ends_session() {
    let adapter = scripted_adapter();
    let (manager, mut events) = start(&adapter, test_config()).await;
    manager.connect(SENSOR).await.unwrap();
    let peer = adapter.accept_peer().await.unwrap();
    drop(peer);

    assert!(matches!(manager.receive().await, Err(LinkError::Closed)));
    assert_eq!(manager.state(), LifecycleState::Idle);
    assert_eq!(
        events.drain().last(),
        Some(&SessionEvent::Disconnected {
            address: SENSOR.to_string()
        })
    );
}

#[tokio::test]
async fn test_disconnect_interrupts_pending_read() {
    let adapter = scripted_adapter();
    let config = SessionConfig {
        read_timeout_ms: 10_000,
        ..test_config()
    };
    let (manager, _events) = start(&adapter, config).await;
    let manager = Arc::new(manager);
    manager.connect(SENSOR).await.unwrap();
    let _peer = adapter.accept_peer().await.unwrap();

    let reader = manager.clone();
    let pending = tokio::spawn(async move { reader.receive().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(2), manager.disconnect())
        .await
        .expect("disconnect must not wait for the read timeout");

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(LinkError::Interrupted)));
    assert_eq!(manager.state(), LifecycleState::Idle);

    // Later sessions are not affected by the interrupt.
    manager.connect(SENSOR).await.unwrap();
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_disconnect_interrupts_pending_connect() {
    let adapter = scripted_adapter();
    let config = SessionConfig {
        connect_timeout_ms: 10_000,
        ..test_config()
    };
    let (manager, mut events) = start(&adapter, config).await;
    let manager = Arc::new(manager);

    let connecting = manager.clone();
    let pending = tokio::spawn(async move { connecting.connect(SILENT).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.disconnect().await;

    assert!(matches!(pending.await.unwrap(), Err(LinkError::Interrupted)));
    assert_eq!(manager.state(), LifecycleState::Idle);
    assert_eq!(connect_failures(&events.drain()), 1);
}

#[tokio::test]
async fn test_connect_disconnect_sequences_settle() {
    let adapter = scripted_adapter();
    let (manager, _events) = start(&adapter, test_config()).await;

    let steps: [Option<&str>; 9] = [
        Some(SENSOR),
        Some(SENSOR),
        None,
        Some(REFUSING),
        Some(SECOND_SENSOR),
        None,
        None,
        Some(BROKEN),
        Some(SENSOR),
    ];

    for step in steps {
        match step {
            Some(address) => {
                let _ = manager.connect(address).await;
            }
            None => manager.disconnect().await,
        }
        let state = manager.state();
        assert!(
            matches!(state, LifecycleState::Idle | LifecycleState::Ready),
            "unsettled state {:?}",
            state
        );
    }
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_radio_events_forwarded_in_order() {
    let adapter = scripted_adapter();
    let (manager, mut events) = start(&adapter, test_config()).await;
    manager.watch_radio().await.unwrap();
    manager.connect(SENSOR).await.unwrap();

    adapter.emit_radio(RadioEvent::Disabling);
    adapter.emit_radio(RadioEvent::Disabled);

    let mut status = manager.subscribe();
    status
        .wait_for(|status| status.adapter == AdapterState::Disabled)
        .await
        .unwrap();

    let drained = events.drain();
    assert_eq!(
        &drained[1..],
        &[SessionEvent::AdapterDisabling, SessionEvent::AdapterDisabled]
    );
    // Default policy leaves the session to the application.
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_radio_off_policy_tears_down_session() {
    let adapter = scripted_adapter();
    let config = SessionConfig {
        disconnect_on_radio_off: true,
        ..test_config()
    };
    let (manager, mut events) = start(&adapter, config).await;
    manager.connect(SENSOR).await.unwrap();

    manager.notify_radio(RadioEvent::Disabling);
    let mut status = manager.subscribe();
    status
        .wait_for(|status| status.lifecycle == LifecycleState::Idle)
        .await
        .unwrap();

    let drained = events.drain();
    assert_eq!(
        &drained[1..],
        &[
            SessionEvent::AdapterDisabling,
            SessionEvent::Disconnected {
                address: SENSOR.to_string()
            },
        ]
    );
}

#[tokio::test]
async fn test_request_enable_powers_radio() {
    let adapter = scripted_adapter();
    adapter.set_enabled(false);
    let (manager, mut events) = start(&adapter, test_config()).await;
    manager.watch_radio().await.unwrap();

    assert!(manager.request_enable().await.unwrap());
    let mut status = manager.subscribe();
    status
        .wait_for(|status| status.adapter == AdapterState::Enabled)
        .await
        .unwrap();

    assert_eq!(
        events.drain(),
        vec![SessionEvent::AdapterEnabling, SessionEvent::AdapterEnabled]
    );
    manager.connect(SENSOR).await.unwrap();
}

#[tokio::test]
async fn test_sensor_inquiry_cycle() {
    let adapter = scripted_adapter();
    let (manager, _events) = start(&adapter, test_config()).await;
    manager.connect(SENSOR).await.unwrap();
    let mut peer = adapter.accept_peer().await.unwrap();
    peer.read_line().await.unwrap();

    let device = tokio::spawn(async move {
        assert_eq!(peer.read_line().await.unwrap().as_deref(), Some("t\r\n"));
        peer.write("24.50,31.20\r\n").await.unwrap();
        assert_eq!(peer.read_line().await.unwrap().as_deref(), Some("ok\r\n"));
    });

    let reading = sensor::inquire(&manager, &SensorConfig::default())
        .await
        .unwrap();
    device.await.unwrap();

    assert_eq!(reading.pm25, Some(24.5));
    assert_eq!(reading.pm10, Some(31.2));
}

#[tokio::test]
async fn test_late_reply_is_not_taken_for_next_reading() {
    let adapter = scripted_adapter();
    let config = SessionConfig {
        read_timeout_ms: 100,
        ..test_config()
    };
    let (manager, _events) = start(&adapter, config).await;
    manager.connect(SENSOR).await.unwrap();
    let mut peer = adapter.accept_peer().await.unwrap();
    peer.read_line().await.unwrap();

    let device = tokio::spawn(async move {
        assert_eq!(peer.read_line().await.unwrap().as_deref(), Some("t\r\n"));
        // Answers only after the first read has given up.
        tokio::time::sleep(Duration::from_millis(200)).await;
        peer.write("11.00\r\n").await.unwrap();

        assert_eq!(peer.read_line().await.unwrap().as_deref(), Some("t\r\n"));
        peer.write("22.00\r\n").await.unwrap();
        assert_eq!(peer.read_line().await.unwrap().as_deref(), Some("ok\r\n"));
    });

    let sensor_config = SensorConfig::default();
    let err = sensor::inquire(&manager, &sensor_config).await.unwrap_err();
    assert!(matches!(
        err,
        LinkError::Timeout {
            operation: "read",
            ..
        }
    ));
    assert!(manager.is_connected());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let reading = sensor::inquire(&manager, &sensor_config).await.unwrap();
    device.await.unwrap();
    assert_eq!(reading.pm25, Some(22.0));
}

#[tokio::test]
async fn test_inquiry_acknowledges_before_queued_commands() {
    let adapter = scripted_adapter();
    let (manager, _events) = start(&adapter, test_config()).await;
    let manager = Arc::new(manager);
    manager.connect(SENSOR).await.unwrap();
    let mut peer = adapter.accept_peer().await.unwrap();
    peer.read_line().await.unwrap();

    let inquiring = manager.clone();
    let inquiry =
        tokio::spawn(async move { sensor::inquire(&inquiring, &SensorConfig::default()).await });
    assert_eq!(peer.read_line().await.unwrap().as_deref(), Some("t\r\n"));

    // Queued while the sensor has not answered yet.
    let sender = manager.clone();
    let other = tokio::spawn(async move { sender.send("x").await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    peer.write("24.50\r\n").await.unwrap();
    assert_eq!(peer.read_line().await.unwrap().as_deref(), Some("ok\r\n"));
    assert_eq!(peer.read_line().await.unwrap().as_deref(), Some("x\r\n"));

    assert_eq!(inquiry.await.unwrap().unwrap().pm25, Some(24.5));
    other.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_disconnect_interrupts_blocked_handshake() {
    // A sync line larger than the transport buffer blocks while the
    // device is not reading.
    let adapter = MockAdapter::new(LocalIdentity::new("D".repeat(4096), "00:11:22:33:44:55"));
    adapter.add_device(SENSOR, Some("PM25 Sensor"), PeerBehavior::Accept);
    let adapter = Arc::new(adapter);

    let config = SessionConfig {
        write_timeout_ms: 10_000,
        ..test_config()
    };
    let (manager, mut events) = start(&adapter, config).await;
    let manager = Arc::new(manager);

    let connecting = manager.clone();
    let pending = tokio::spawn(async move { connecting.connect(SENSOR).await });
    let _peer = adapter.accept_peer().await.unwrap();

    let mut status = manager.subscribe();
    status
        .wait_for(|status| status.lifecycle == LifecycleState::Handshaking)
        .await
        .unwrap();
    drop(status);

    tokio::time::timeout(Duration::from_secs(2), manager.disconnect())
        .await
        .expect("disconnect must not wait for the write timeout");

    assert!(matches!(pending.await.unwrap(), Err(LinkError::Interrupted)));
    assert_eq!(manager.state(), LifecycleState::Idle);

    let drained = events.drain();
    assert_eq!(connect_failures(&drained), 1);
    assert_eq!(connected_events(&drained), 0);
}
