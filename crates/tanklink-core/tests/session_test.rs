//! End-to-end session tests against a scripted in-memory transport.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::json;
use tokio::sync::mpsc;

use tanklink_core::{
    CommandError, ConnectionState, Event, EventKind, Session, SessionConfig, Transport,
    TransportError, TransportEvent,
};
use tanklink_proto::Device;

// ── Scripted transport ──────────────────────────────────────────────────────

#[derive(Default)]
struct MockState {
    events_tx: Option<mpsc::Sender<TransportEvent>>,
    published: Vec<(String, Vec<u8>)>,
    subscribed: Vec<String>,
    unsubscribed: Vec<String>,
    connect_calls: u32,
    reconnect_calls: u32,
    disconnect_calls: u32,
    fail_reconnects: u32,
    auto_resume: bool,
}

#[derive(Default)]
struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    fn emit(&self, event: TransportEvent) {
        let tx = self
            .state
            .lock()
            .unwrap()
            .events_tx
            .clone()
            .expect("transport not connected");
        tx.try_send(event).expect("transport channel full");
    }

    fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().published.clone()
    }

    fn subscribed(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribed.clone()
    }

    fn unsubscribed(&self) -> Vec<String> {
        self.state.lock().unwrap().unsubscribed.clone()
    }

    fn reconnect_calls(&self) -> u32 {
        self.state.lock().unwrap().reconnect_calls
    }

    fn disconnect_calls(&self) -> u32 {
        self.state.lock().unwrap().disconnect_calls
    }

    fn script_reconnects(&self, failures: u32, auto_resume: bool) {
        let mut state = self.state.lock().unwrap();
        state.fail_reconnects = failures;
        state.auto_resume = auto_resume;
    }
}

impl Transport for MockTransport {
    fn connect(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.events_tx = Some(events);
            state.connect_calls += 1;
            Ok(())
        })
    }

    fn reconnect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let (resume_tx, result) = {
                let mut state = self.state.lock().unwrap();
                state.reconnect_calls += 1;
                if state.fail_reconnects > 0 {
                    state.fail_reconnects -= 1;
                    (
                        None,
                        Err(TransportError::Connect("broker unreachable".to_owned())),
                    )
                } else if state.auto_resume {
                    (state.events_tx.clone(), Ok(()))
                } else {
                    (None, Ok(()))
                }
            };
            if let Some(tx) = resume_tx {
                let _ = tx
                    .send(TransportEvent::Resumed {
                        session_preserved: false,
                    })
                    .await;
            }
            result
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.state.lock().unwrap().disconnect_calls += 1;
            Ok(())
        })
    }

    fn publish(
        &self,
        topic: String,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.state.lock().unwrap().published.push((topic, payload));
            Ok(())
        })
    }

    fn subscribe(&self, filter: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.state.lock().unwrap().subscribed.push(filter);
            Ok(())
        })
    }

    fn unsubscribe(&self, filter: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.state.lock().unwrap().unsubscribed.push(filter);
            Ok(())
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

const MAC: &str = "047863aabbcc";

fn device() -> Device {
    Device::new(MAC)
}

fn test_config() -> SessionConfig {
    SessionConfig {
        client_id: "tanklink-test".to_owned(),
        session_id: "session-test".to_owned(),
        ..SessionConfig::default()
    }
}

async fn connected_session(config: SessionConfig) -> (Session, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::default());
    let session = Session::spawn(config, Arc::clone(&transport) as Arc<dyn Transport>);
    session.watch(&device()).await.unwrap();
    session.connect().await.unwrap();
    (session, transport)
}

async fn wait_for_published(transport: &MockTransport, count: usize) {
    for _ in 0..500 {
        if transport.published().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {count} published commands, saw {}",
        transport.published().len()
    );
}

async fn wait_for_state(session: &Session, predicate: impl Fn(ConnectionState) -> bool) {
    // Coarse polling steps so paused-clock auto-advance can cross the
    // multi-second backoff schedule.
    for _ in 0..500 {
        if predicate(session.state()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session never reached expected state, now {:?}", session.state());
}

async fn wait_emitted(session: &Session, kind: EventKind, count: u64) {
    for _ in 0..500 {
        if session.emitted(kind).await.unwrap() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!(
        "expected {count} {} events, saw {}",
        kind.as_str(),
        session.emitted(kind).await.unwrap()
    );
}

/// Build the device's answer to a published envelope, echoing its
/// correlation token onto the envelope's response topic.
fn response_frame(published: &[u8], body_extra: serde_json::Value) -> TransportEvent {
    let envelope: serde_json::Value = serde_json::from_slice(published).unwrap();
    let mut body = json!({
        "command": envelope["request"]["command"],
        "macAddress": MAC,
    });
    for (key, value) in body_extra.as_object().unwrap() {
        body[key] = value.clone();
    }
    let payload = json!({
        "clientID": "device",
        "sessionID": "device",
        "requestID": envelope["requestID"],
        "protocolVersion": 2,
        "response": body,
    });
    TransportEvent::Frame {
        topic: envelope["responseTopic"].as_str().unwrap().to_owned(),
        payload: serde_json::to_vec(&payload).unwrap(),
    }
}

/// An unsolicited status broadcast on the device's event topic.
fn broadcast_status(body: serde_json::Value) -> TransportEvent {
    let mut full = json!({"command": 16_777_219});
    for (key, value) in body.as_object().unwrap() {
        full[key] = value.clone();
    }
    TransportEvent::Frame {
        topic: format!("evt/52/navilink-{MAC}/st"),
        payload: serde_json::to_vec(&full).unwrap(),
    }
}

fn interrupted() -> TransportEvent {
    TransportEvent::Interrupted {
        reason: "keepalive timeout".to_owned(),
    }
}

// ── Connection and subscriptions ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn connect_subscribes_watched_device_filters() {
    let (session, transport) = connected_session(test_config()).await;
    assert_eq!(session.state(), ConnectionState::Connected);

    let filters = transport.subscribed();
    assert_eq!(filters.len(), 3);
    assert!(filters.contains(&format!("cmd/52/navilink-{MAC}/tanklink-test/res/#")));
    assert!(filters.contains(&"cmd/52/tanklink-test/res/#".to_owned()));
    assert!(filters.contains(&format!("evt/52/navilink-{MAC}/#")));
}

#[tokio::test(start_paused = true)]
async fn connect_twice_is_rejected() {
    let (session, _transport) = connected_session(test_config()).await;
    assert!(session.connect().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn unwatch_drops_device_subscriptions() {
    let (session, transport) = connected_session(test_config()).await;
    session.unwatch(&device().mac_address).await.unwrap();
    assert_eq!(transport.unsubscribed().len(), 3);
}

// ── Command round trips ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn status_request_resolves_with_decoded_snapshot() {
    let (session, transport) = connected_session(test_config()).await;

    let requester = session.clone();
    let handle = tokio::spawn(async move { requester.request_status(&device()).await });

    wait_for_published(&transport, 1).await;
    let (topic, payload) = transport.published()[0].clone();
    assert_eq!(topic, format!("cmd/52/navilink-{MAC}/st"));
    transport.emit(response_frame(
        &payload,
        json!({"temperatureType": 2, "dhwTemperature": 104, "dhwChargePer": 93, "compUse": 2}),
    ));

    let snapshot = handle.await.unwrap().unwrap();
    assert_eq!(snapshot.device.as_str(), MAC);
    assert_eq!(snapshot.number("dhw_temperature"), Some(125.6));
    assert_eq!(snapshot.number("dhw_charge_percent"), Some(93.0));
    assert_eq!(snapshot.flag("compressor_running"), Some(true));

    // The same payload also flowed through the bus.
    assert_eq!(session.emitted(EventKind::StatusReceived).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn reservation_read_returns_the_stored_program() {
    let (session, transport) = connected_session(test_config()).await;

    let requester = session.clone();
    let handle = tokio::spawn(async move { requester.read_reservations(&device()).await });

    wait_for_published(&transport, 1).await;
    let (topic, payload) = transport.published()[0].clone();
    assert_eq!(topic, format!("cmd/52/navilink-{MAC}/st/rsv/rd"));
    transport.emit(response_frame(
        &payload,
        json!({
            "reservationUse": 1,
            "reservation": [
                {"enable": 1, "week": 62, "hour": 6, "min": 30, "mode": 1, "param": [120]},
                {"enable": 1, "week": 62, "hour": 21, "min": 0, "mode": 1, "param": [110]},
            ],
        }),
    ));

    let schedule = handle.await.unwrap().unwrap();
    assert!(schedule.enabled());
    assert_eq!(schedule.entries.len(), 2);
    assert_eq!(schedule.entries[0].hour, 6);
    assert_eq!(schedule.entries[1].param, vec![110]);
}

#[tokio::test(start_paused = true)]
async fn accepted_control_command_resolves_ack() {
    let (session, transport) = connected_session(test_config()).await;

    let requester = session.clone();
    let handle = tokio::spawn(async move { requester.set_power(&device(), true).await });

    wait_for_published(&transport, 1).await;
    let (_, payload) = transport.published()[0].clone();
    let sent: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(sent["request"]["command"], 33_554_434);

    transport.emit(response_frame(&payload, json!({})));
    let ack = handle.await.unwrap().unwrap();
    assert_eq!(ack.command, 33_554_434);
    assert_eq!(ack.device.as_str(), MAC);
}

#[tokio::test(start_paused = true)]
async fn rejected_command_surfaces_reason_code() {
    let (session, transport) = connected_session(test_config()).await;

    let requester = session.clone();
    let handle =
        tokio::spawn(async move { requester.set_dhw_temperature(&device(), 140.0).await });

    wait_for_published(&transport, 1).await;
    let (_, payload) = transport.published()[0].clone();
    transport.emit(response_frame(&payload, json!({"errorCode": 515})));

    let error = handle.await.unwrap().unwrap_err();
    assert!(matches!(error, CommandError::Rejected { code: 515 }));
}

#[tokio::test(start_paused = true)]
async fn out_of_range_parameter_fails_before_the_wire() {
    let (session, transport) = connected_session(test_config()).await;
    let error = session
        .set_dhw_temperature(&device(), 200.0)
        .await
        .unwrap_err();
    assert!(matches!(error, CommandError::Validation(_)));
    assert!(transport.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_command_times_out() {
    let mut config = test_config();
    config.command_timeout = Duration::from_millis(100);
    let (session, transport) = connected_session(config).await;

    let error = session.set_power(&device(), false).await.unwrap_err();
    assert!(matches!(
        error,
        CommandError::Timeout { timeout } if timeout == Duration::from_millis(100)
    ));
    // It was published; only the acknowledgement never came.
    assert_eq!(transport.published().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_acknowledgement_after_timeout_is_ignored() {
    let mut config = test_config();
    config.command_timeout = Duration::from_millis(50);
    let (session, transport) = connected_session(config).await;

    let error = session.set_power(&device(), true).await.unwrap_err();
    assert!(matches!(error, CommandError::Timeout { .. }));

    // A late echo of the same correlation must not disturb anything.
    let (_, payload) = transport.published()[0].clone();
    transport.emit(response_frame(&payload, json!({})));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn submit_while_disconnected_fails_fast() {
    let transport = Arc::new(MockTransport::default());
    let session = Session::spawn(
        test_config(),
        Arc::clone(&transport) as Arc<dyn Transport>,
    );
    let error = session.set_power(&device(), true).await.unwrap_err();
    assert!(matches!(error, CommandError::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn disconnect_fails_commands_still_pending() {
    let (session, transport) = connected_session(test_config()).await;

    let requester = session.clone();
    let handle = tokio::spawn(async move { requester.set_power(&device(), true).await });
    wait_for_published(&transport, 1).await;

    session.disconnect().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    let error = handle.await.unwrap().unwrap_err();
    assert!(matches!(error, CommandError::Disconnected));
}

// ── Queueing across interruptions ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn commands_queue_while_interrupted_and_flush_in_order_on_resume() {
    let (session, transport) = connected_session(test_config()).await;
    let subscribes_before = transport.subscribed().len();

    transport.emit(interrupted());
    wait_for_state(&session, |s| !s.is_connected()).await;

    let mut handles = Vec::new();
    for fahrenheit in [120.0, 125.0, 130.0] {
        let requester = session.clone();
        handles.push(tokio::spawn(async move {
            requester.set_dhw_temperature(&device(), fahrenheit).await
        }));
        // Let the submission reach the engine before the next one.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(transport.published().is_empty());

    transport.emit(TransportEvent::Resumed {
        session_preserved: false,
    });
    wait_for_published(&transport, 3).await;

    // Flushed oldest-first.
    let setpoints: Vec<i64> = transport
        .published()
        .iter()
        .map(|(_, payload)| {
            let envelope: serde_json::Value = serde_json::from_slice(payload).unwrap();
            envelope["request"]["param"][0].as_i64().unwrap()
        })
        .collect();
    assert_eq!(setpoints, vec![98, 103, 109]);

    // Subscriptions were re-established exactly once.
    assert_eq!(transport.subscribed().len(), subscribes_before * 2);

    for (i, handle) in handles.into_iter().enumerate() {
        let (_, payload) = transport.published()[i].clone();
        transport.emit(response_frame(&payload, json!({})));
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn full_queue_evicts_the_oldest_command() {
    let mut config = test_config();
    config.max_queued_commands = 2;
    let (session, transport) = connected_session(config).await;

    transport.emit(interrupted());
    wait_for_state(&session, |s| !s.is_connected()).await;

    let mut handles = Vec::new();
    for fahrenheit in [120.0, 125.0, 130.0] {
        let requester = session.clone();
        handles.push(tokio::spawn(async move {
            requester.set_dhw_temperature(&device(), fahrenheit).await
        }));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let first = handles.remove(0).await.unwrap().unwrap_err();
    assert!(matches!(first, CommandError::QueueOverflow));

    transport.emit(TransportEvent::Resumed {
        session_preserved: false,
    });
    wait_for_published(&transport, 2).await;
    assert_eq!(transport.published().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn publish_pacing_spaces_consecutive_commands() {
    let mut config = test_config();
    config.command_gap = Duration::from_millis(100);
    let (session, transport) = connected_session(config).await;

    let mut handles = Vec::new();
    for on in [true, false] {
        let requester = session.clone();
        handles.push(tokio::spawn(
            async move { requester.set_power(&device(), on).await },
        ));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    wait_for_published(&transport, 1).await;
    assert_eq!(transport.published().len(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    wait_for_published(&transport, 2).await;

    for (i, handle) in handles.into_iter().enumerate() {
        let (_, payload) = transport.published()[i].clone();
        transport.emit(response_frame(&payload, json!({})));
        handle.await.unwrap().unwrap();
    }
}

// ── Reconnection ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reconnect_backs_off_until_the_broker_returns() {
    let (session, transport) = connected_session(test_config()).await;
    transport.script_reconnects(2, true);

    transport.emit(interrupted());
    wait_for_state(&session, |s| !s.is_connected()).await;
    wait_for_state(&session, ConnectionState::is_connected).await;

    assert_eq!(transport.reconnect_calls(), 3);
    assert_eq!(
        session
            .emitted(EventKind::ConnectionInterrupted)
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        session.emitted(EventKind::ConnectionResumed).await.unwrap(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_retry_budget_ends_disconnected() {
    let mut config = test_config();
    config.reconnect.max_retries = Some(2);
    let (session, transport) = connected_session(config).await;
    transport.script_reconnects(u32::MAX, false);

    let requester = session.clone();
    let handle = tokio::spawn(async move { requester.set_power(&device(), true).await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    transport.emit(interrupted());
    wait_for_state(&session, |s| s == ConnectionState::Disconnected).await;

    assert_eq!(transport.reconnect_calls(), 2);
    // Giving up also tears the transport down so it stops redialing.
    assert_eq!(transport.disconnect_calls(), 1);
    let error = handle.await.unwrap().unwrap_err();
    assert!(matches!(error, CommandError::Disconnected));
}

// ── Events from telemetry ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn first_broadcast_is_receipt_only_later_changes_become_events() {
    let (session, transport) = connected_session(test_config()).await;
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        EventKind::FieldChanged,
        EventKind::HeatingStarted,
        EventKind::HeatingStopped,
    ] {
        let log = Arc::clone(&log);
        session
            .on(kind, move |event| {
                let line = match event {
                    Event::FieldChanged {
                        field, current, ..
                    } => format!("{field}={current:?}"),
                    other => other.kind().as_str().to_owned(),
                };
                log.lock().unwrap().push(line);
                Ok(())
            })
            .await
            .unwrap();
    }

    transport.emit(broadcast_status(json!({
        "temperatureType": 2, "dhwTemperature": 104, "compUse": 0, "errorCode": 0,
    })));
    wait_emitted(&session, EventKind::StatusReceived, 1).await;
    assert!(log.lock().unwrap().is_empty());

    transport.emit(broadcast_status(json!({
        "temperatureType": 2, "dhwTemperature": 106, "compUse": 2, "errorCode": 0,
    })));
    wait_emitted(&session, EventKind::StatusReceived, 2).await;

    let lines = log.lock().unwrap().clone();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("dhw_temperature="));
    assert_eq!(lines[1], "heating_started");

    transport.emit(broadcast_status(json!({
        "temperatureType": 2, "dhwTemperature": 106, "compUse": 0, "errorCode": 0,
    })));
    wait_emitted(&session, EventKind::HeatingStopped, 1).await;
}

#[tokio::test(start_paused = true)]
async fn error_codes_raise_and_clear() {
    let (session, transport) = connected_session(test_config()).await;

    transport.emit(broadcast_status(json!({"errorCode": 0, "subErrorCode": 0})));
    wait_emitted(&session, EventKind::StatusReceived, 1).await;

    let waiter = session.clone();
    let raised = tokio::spawn(async move {
        waiter
            .wait_for(EventKind::ErrorRaised, Duration::from_secs(5))
            .await
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    transport.emit(broadcast_status(json!({"errorCode": 515, "subErrorCode": 0})));
    let Event::ErrorRaised { code, .. } = raised.await.unwrap().unwrap() else {
        panic!("expected error raised");
    };
    assert_eq!(code, 515);

    transport.emit(broadcast_status(json!({"errorCode": 0, "subErrorCode": 0})));
    wait_emitted(&session, EventKind::ErrorCleared, 1).await;
}

#[tokio::test(start_paused = true)]
async fn snapshot_accessor_returns_latest_payload() {
    let (session, transport) = connected_session(test_config()).await;
    let mac = device().mac_address;

    assert!(session
        .snapshot(&mac, tanklink_core::SnapshotCategory::Status)
        .await
        .unwrap()
        .is_none());

    transport.emit(broadcast_status(json!({"dhwChargePer": 41})));
    transport.emit(broadcast_status(json!({"dhwChargePer": 42})));
    wait_emitted(&session, EventKind::StatusReceived, 2).await;

    let snapshot = session
        .snapshot(&mac, tanklink_core::SnapshotCategory::Status)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.number("dhw_charge_percent"), Some(42.0));
    assert_eq!(snapshot.seq, 2);
}

// ── Listener management ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn listener_registry_over_the_handle() {
    let (session, transport) = connected_session(test_config()).await;

    let id = session
        .on(EventKind::StatusReceived, |_| Ok(()))
        .await
        .unwrap();
    session
        .once(EventKind::StatusReceived, |_| Ok(()))
        .await
        .unwrap();
    assert_eq!(
        session.listener_count(EventKind::StatusReceived).await.unwrap(),
        2
    );
    assert_eq!(
        session.active_kinds().await.unwrap(),
        vec![EventKind::StatusReceived]
    );

    transport.emit(broadcast_status(json!({"dhwChargePer": 10})));
    wait_emitted(&session, EventKind::StatusReceived, 1).await;
    // The once-listener is gone after one delivery.
    assert_eq!(
        session.listener_count(EventKind::StatusReceived).await.unwrap(),
        1
    );

    assert!(session.off(id).await.unwrap());
    assert!(!session.off(id).await.unwrap());
    assert_eq!(session.off_all(EventKind::StatusReceived).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn wait_for_times_out_and_unregisters() {
    let (session, _transport) = connected_session(test_config()).await;
    let error = session
        .wait_for(EventKind::HeatingStarted, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        tanklink_core::SessionError::WaitTimeout { .. }
    ));
    assert_eq!(
        session.listener_count(EventKind::HeatingStarted).await.unwrap(),
        0
    );
}
