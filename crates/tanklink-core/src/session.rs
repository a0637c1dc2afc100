//! Session engine.
//!
//! All mutable session state (bus, snapshots, pending commands, outbox,
//! connection state) lives inside one spawned engine task. [`Session`] is a
//! cheap clonable handle that talks to the engine over a channel and gets
//! answers on oneshot replies, so no lock is ever held across the wire.
//!
//! Timers (command deadlines, reconnect backoff, publish pacing) are small
//! spawned sleep tasks that post work items back onto the same channel; the
//! engine stays a single `select!` loop with no timer wheel of its own.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tanklink_proto::{
    decode, topic, AckStatus, CommandEnvelope, CorrelationId, Device, EnergyUsageReport, FieldId,
    FieldValue, InboundKind, MacAddress, ReservationSchedule,
};

use crate::bus::{Callback, EventBus, ListenerId};
use crate::config::SessionConfig;
use crate::detect;
use crate::error::{CommandError, SessionError};
use crate::event::{Event, EventKind};
use crate::snapshot::{DeviceSnapshot, SnapshotCategory};
use crate::transport::{Transport, TransportEvent};

// ── Connection state ────────────────────────────────────────────────────────

/// Lifecycle of the session's broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    Connected,
    /// The link just dropped; recovery is about to start.
    Interrupted,
    /// Backoff recovery in progress, `attempt` is 1-based.
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// True while the session keeps working toward a live link, which is
    /// when submitted commands are held instead of failed.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

// ── Command results ─────────────────────────────────────────────────────────

/// Successful completion of one submitted command.
#[derive(Debug)]
pub struct CommandAck {
    pub device: MacAddress,
    pub correlation: CorrelationId,
    /// Command code echoed by the device.
    pub command: u32,
    /// Set when the answer was a status or device-info payload.
    pub snapshot: Option<Arc<DeviceSnapshot>>,
    /// Set when the answer was an energy-usage report.
    pub energy: Option<EnergyUsageReport>,
    /// Set when the answer was a reservation-program read.
    pub reservations: Option<ReservationSchedule>,
}

/// Data payload a query response resolves with.
enum QueryPayload {
    Snapshot(Arc<DeviceSnapshot>),
    Energy(EnergyUsageReport),
    Reservations(ReservationSchedule),
}

// ── Engine protocol ─────────────────────────────────────────────────────────

pub(crate) enum Control {
    Connect {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Watch {
        device: Device,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Unwatch {
        device: MacAddress,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Subscribe {
        kind: EventKind,
        priority: i32,
        once: bool,
        callback: Callback,
        reply: oneshot::Sender<ListenerId>,
    },
    Unsubscribe {
        id: ListenerId,
        reply: oneshot::Sender<bool>,
    },
    UnsubscribeAll {
        kind: EventKind,
        reply: oneshot::Sender<usize>,
    },
    Submit {
        envelope: CommandEnvelope,
        reply: oneshot::Sender<Result<CommandAck, CommandError>>,
    },
    Snapshot {
        device: MacAddress,
        category: SnapshotCategory,
        reply: oneshot::Sender<Option<Arc<DeviceSnapshot>>>,
    },
    ListenerCount {
        kind: EventKind,
        reply: oneshot::Sender<usize>,
    },
    ActiveKinds {
        reply: oneshot::Sender<Vec<EventKind>>,
    },
    Emitted {
        kind: EventKind,
        reply: oneshot::Sender<u64>,
    },
    // Timer work items posted by spawned sleep tasks.
    CommandDeadline {
        correlation: CorrelationId,
    },
    ReconnectDue {
        attempt: u32,
        epoch: u64,
    },
    OutboxDue,
}

struct Pending {
    envelope: CommandEnvelope,
    reply: oneshot::Sender<Result<CommandAck, CommandError>>,
    sent: bool,
}

// ── Engine ──────────────────────────────────────────────────────────────────

struct Engine {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    transport_tx: mpsc::Sender<TransportEvent>,
    work_tx: mpsc::Sender<Control>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    bus: EventBus,
    devices: Vec<Device>,
    snapshots: HashMap<(MacAddress, SnapshotCategory), Arc<DeviceSnapshot>>,
    pending: HashMap<CorrelationId, Pending>,
    /// Correlations of not-yet-published commands, oldest first.
    outbox: VecDeque<CorrelationId>,
    seq: u64,
    /// Bumped on every connect/interrupt/resume/disconnect so stale timer
    /// work items can be recognized and dropped.
    epoch: u64,
    last_publish: HashMap<MacAddress, Instant>,
    outbox_timer_armed: bool,
}

impl Engine {
    async fn run(
        mut self,
        mut ctrl_rx: mpsc::Receiver<Control>,
        mut transport_rx: mpsc::Receiver<TransportEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(event) = transport_rx.recv() => self.handle_transport(event).await,
                control = ctrl_rx.recv() => match control {
                    Some(control) => self.handle_control(control).await,
                    None => break,
                },
            }
        }
        self.shutdown().await;
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(?previous, ?next, "connection state changed");
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn publish_event(&mut self, event: Event) {
        let delivered = self.bus.publish(&event).await;
        debug!(kind = event.kind().as_str(), delivered, "event published");
    }

    // ── Control handling ────────────────────────────────────────────────

    #[allow(clippy::too_many_lines)]
    async fn handle_control(&mut self, control: Control) {
        match control {
            Control::Connect { reply } => {
                if self.current_state().is_active() {
                    let _ = reply.send(Err(SessionError::AlreadyConnected));
                    return;
                }
                self.set_state(ConnectionState::Connecting);
                match self.transport.connect(self.transport_tx.clone()).await {
                    Ok(()) => {
                        self.epoch += 1;
                        self.set_state(ConnectionState::Connected);
                        info!(client_id = %self.config.client_id, "session connected");
                        if let Err(error) = self.subscribe_all().await {
                            warn!(%error, "initial subscribe failed");
                        }
                        self.drain_outbox().await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(error) => {
                        self.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(Err(error.into()));
                    }
                }
            }
            Control::Disconnect { reply } => {
                self.epoch += 1;
                self.fail_all_pending(|| CommandError::Disconnected);
                if let Err(error) = self.transport.disconnect().await {
                    debug!(%error, "transport disconnect");
                }
                self.set_state(ConnectionState::Disconnected);
                info!("session disconnected");
                let _ = reply.send(Ok(()));
            }
            Control::Watch { device, reply } => {
                if self
                    .devices
                    .iter()
                    .any(|d| d.mac_address == device.mac_address)
                {
                    let _ = reply.send(Ok(()));
                    return;
                }
                let before = self.device_filters();
                info!(device = %device.mac_address, "watching device");
                self.devices.push(device);
                let result = self.apply_filter_delta(&before).await;
                let _ = reply.send(result);
            }
            Control::Unwatch { device, reply } => {
                let before = self.device_filters();
                self.devices.retain(|d| d.mac_address != device);
                self.snapshots.retain(|(mac, _), _| *mac != device);
                let result = self.apply_filter_delta(&before).await;
                let _ = reply.send(result);
            }
            Control::Subscribe {
                kind,
                priority,
                once,
                callback,
                reply,
            } => {
                let id = self.bus.subscribe(kind, priority, once, callback);
                let _ = reply.send(id);
            }
            Control::Unsubscribe { id, reply } => {
                let _ = reply.send(self.bus.unsubscribe(id));
            }
            Control::UnsubscribeAll { kind, reply } => {
                let _ = reply.send(self.bus.unsubscribe_all(kind));
            }
            Control::Submit { envelope, reply } => self.handle_submit(envelope, reply).await,
            Control::Snapshot {
                device,
                category,
                reply,
            } => {
                let _ = reply.send(self.snapshots.get(&(device, category)).cloned());
            }
            Control::ListenerCount { kind, reply } => {
                let _ = reply.send(self.bus.listener_count(kind));
            }
            Control::ActiveKinds { reply } => {
                let _ = reply.send(self.bus.active_kinds());
            }
            Control::Emitted { kind, reply } => {
                let _ = reply.send(self.bus.emitted(kind));
            }
            Control::CommandDeadline { correlation } => {
                if let Some(pending) = self.pending.remove(&correlation) {
                    self.outbox.retain(|c| *c != correlation);
                    debug!(%correlation, sent = pending.sent, "command deadline elapsed");
                    let _ = pending.reply.send(Err(CommandError::Timeout {
                        timeout: self.config.command_timeout,
                    }));
                }
            }
            Control::ReconnectDue { attempt, epoch } => {
                self.handle_reconnect_due(attempt, epoch).await;
            }
            Control::OutboxDue => {
                self.outbox_timer_armed = false;
                self.drain_outbox().await;
            }
        }
    }

    async fn handle_submit(
        &mut self,
        envelope: CommandEnvelope,
        reply: oneshot::Sender<Result<CommandAck, CommandError>>,
    ) {
        let state = self.current_state();
        if !state.is_active() {
            let _ = reply.send(Err(CommandError::Disconnected));
            return;
        }
        let correlation = envelope.request_id;
        debug!(%correlation, command = envelope.request.command, "command submitted");
        self.pending.insert(
            correlation,
            Pending {
                envelope,
                reply,
                sent: false,
            },
        );
        self.outbox.push_back(correlation);
        while self.outbox.len() > self.config.max_queued_commands {
            if let Some(oldest) = self.outbox.pop_front() {
                if let Some(evicted) = self.pending.remove(&oldest) {
                    warn!(correlation = %oldest, "outbound queue full, dropping oldest command");
                    let _ = evicted.reply.send(Err(CommandError::QueueOverflow));
                }
            }
        }
        if self.pending.contains_key(&correlation) {
            self.arm_deadline(correlation);
            if state.is_connected() {
                self.drain_outbox().await;
            }
        }
    }

    // ── Transport handling ──────────────────────────────────────────────

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame { topic, payload } => self.handle_frame(&topic, &payload).await,
            TransportEvent::Interrupted { reason } => {
                if !self.current_state().is_connected() {
                    return;
                }
                warn!(%reason, "connection interrupted");
                self.epoch += 1;
                self.set_state(ConnectionState::Interrupted);
                self.publish_event(Event::ConnectionInterrupted { reason })
                    .await;
                self.schedule_reconnect(1).await;
            }
            TransportEvent::Resumed { session_preserved } => {
                let state = self.current_state();
                if state.is_connected() || !state.is_active() {
                    return;
                }
                self.epoch += 1;
                self.set_state(ConnectionState::Connected);
                info!(session_preserved, "connection resumed");
                if !session_preserved {
                    if let Err(error) = self.subscribe_all().await {
                        warn!(%error, "resubscribe after resume failed");
                    }
                }
                self.publish_event(Event::ConnectionResumed { session_preserved })
                    .await;
                self.drain_outbox().await;
            }
        }
    }

    async fn handle_frame(&mut self, frame_topic: &str, payload: &[u8]) {
        let inbound = match decode(frame_topic, payload) {
            Ok(inbound) => inbound,
            Err(error) => {
                debug!(topic = %frame_topic, %error, "ignoring undecodable frame");
                return;
            }
        };
        match inbound.kind {
            InboundKind::Status(fields) => {
                let snapshot = self
                    .ingest(inbound.device, SnapshotCategory::Status, fields)
                    .await;
                self.resolve_query(
                    inbound.correlation,
                    inbound.command,
                    QueryPayload::Snapshot(snapshot),
                );
            }
            InboundKind::Feature(fields) => {
                let snapshot = self
                    .ingest(inbound.device, SnapshotCategory::Feature, fields)
                    .await;
                self.resolve_query(
                    inbound.correlation,
                    inbound.command,
                    QueryPayload::Snapshot(snapshot),
                );
            }
            InboundKind::EnergyUsage(report) => {
                self.resolve_query(
                    inbound.correlation,
                    inbound.command,
                    QueryPayload::Energy(report),
                );
            }
            InboundKind::Reservation(schedule) => {
                self.resolve_query(
                    inbound.correlation,
                    inbound.command,
                    QueryPayload::Reservations(schedule),
                );
            }
            InboundKind::Ack(status) => {
                let Some(correlation) = inbound.correlation else {
                    debug!(topic = %frame_topic, "acknowledgement without correlation");
                    return;
                };
                let Some(pending) = self.pending.remove(&correlation) else {
                    // Duplicate delivery or an ack for a command that
                    // already timed out.
                    debug!(%correlation, "acknowledgement for unknown correlation");
                    return;
                };
                self.outbox.retain(|c| *c != correlation);
                let result = match status {
                    AckStatus::Accepted => Ok(CommandAck {
                        device: inbound.device,
                        correlation,
                        command: inbound.command,
                        snapshot: None,
                        energy: None,
                        reservations: None,
                    }),
                    AckStatus::Rejected { code } => Err(CommandError::Rejected { code }),
                };
                let _ = pending.reply.send(result);
            }
        }
    }

    /// Store a fresh snapshot, publishing the receipt event first and the
    /// derived change events after it.
    async fn ingest(
        &mut self,
        device: MacAddress,
        category: SnapshotCategory,
        fields: BTreeMap<FieldId, FieldValue>,
    ) -> Arc<DeviceSnapshot> {
        self.seq += 1;
        let snapshot = Arc::new(DeviceSnapshot {
            device: device.clone(),
            category,
            seq: self.seq,
            received_at: Utc::now(),
            fields,
        });
        let key = (device, category);
        let previous = self.snapshots.get(&key).cloned();
        let receipt = match category {
            SnapshotCategory::Status => Event::StatusReceived {
                snapshot: Arc::clone(&snapshot),
            },
            SnapshotCategory::Feature => Event::FeatureReceived {
                snapshot: Arc::clone(&snapshot),
            },
        };
        self.publish_event(receipt).await;
        for event in detect::diff(
            &self.config.watched_fields,
            previous.as_deref(),
            &snapshot,
        ) {
            self.publish_event(event).await;
        }
        self.snapshots.insert(key, Arc::clone(&snapshot));
        snapshot
    }

    fn resolve_query(
        &mut self,
        correlation: Option<CorrelationId>,
        command: u32,
        payload: QueryPayload,
    ) {
        let Some(correlation) = correlation else {
            return;
        };
        let Some(pending) = self.pending.remove(&correlation) else {
            return;
        };
        self.outbox.retain(|c| *c != correlation);
        let device = pending.envelope.device().clone();
        let mut ack = CommandAck {
            device,
            correlation,
            command,
            snapshot: None,
            energy: None,
            reservations: None,
        };
        match payload {
            QueryPayload::Snapshot(snapshot) => ack.snapshot = Some(snapshot),
            QueryPayload::Energy(report) => ack.energy = Some(report),
            QueryPayload::Reservations(schedule) => ack.reservations = Some(schedule),
        }
        let _ = pending.reply.send(Ok(ack));
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    /// Filters the watched devices need, deduplicated, in watch order.
    fn device_filters(&self) -> Vec<String> {
        let client_id = &self.config.client_id;
        let mut filters = Vec::new();
        for device in &self.devices {
            for filter in [
                topic::response_filter(device, client_id),
                topic::client_response_filter(device.device_type, client_id),
                topic::event_filter(device),
            ] {
                if !filters.contains(&filter) {
                    filters.push(filter);
                }
            }
        }
        filters
    }

    async fn subscribe_all(&mut self) -> Result<(), SessionError> {
        for filter in self.device_filters() {
            debug!(%filter, "subscribing");
            self.transport.subscribe(filter).await?;
        }
        Ok(())
    }

    /// Subscribe/unsubscribe exactly the filters that changed relative to
    /// `before`. No-op while not connected; the next (re)connect
    /// subscribes the full set.
    async fn apply_filter_delta(&mut self, before: &[String]) -> Result<(), SessionError> {
        if !self.current_state().is_connected() {
            return Ok(());
        }
        let after = self.device_filters();
        for filter in after.iter().filter(|f| !before.contains(f)) {
            debug!(%filter, "subscribing");
            self.transport.subscribe(filter.clone()).await?;
        }
        for filter in before.iter().filter(|f| !after.contains(f)) {
            debug!(%filter, "unsubscribing");
            self.transport.unsubscribe(filter.clone()).await?;
        }
        Ok(())
    }

    // ── Outbox ──────────────────────────────────────────────────────────

    async fn drain_outbox(&mut self) {
        while self.current_state().is_connected() {
            let Some(&correlation) = self.outbox.front() else {
                break;
            };
            let Some(pending) = self.pending.get(&correlation) else {
                self.outbox.pop_front();
                continue;
            };
            let device = pending.envelope.device().clone();
            if let Some(wait) = self.gap_remaining(&device) {
                self.arm_outbox_timer(wait);
                break;
            }
            let publish_topic = pending.envelope.request_topic.clone();
            let payload = pending.envelope.to_bytes();
            match self.transport.publish(publish_topic, payload).await {
                Ok(()) => {
                    self.outbox.pop_front();
                    if let Some(pending) = self.pending.get_mut(&correlation) {
                        pending.sent = true;
                    }
                    self.last_publish.insert(device, Instant::now());
                    debug!(%correlation, "command published");
                }
                Err(error) => {
                    // Leave it queued; the transport will report the
                    // interruption and the resume path drains again.
                    warn!(%correlation, %error, "publish failed, command stays queued");
                    break;
                }
            }
        }
    }

    fn gap_remaining(&self, device: &MacAddress) -> Option<Duration> {
        if self.config.command_gap.is_zero() {
            return None;
        }
        let ready = *self.last_publish.get(device)? + self.config.command_gap;
        let now = Instant::now();
        (ready > now).then(|| ready - now)
    }

    fn arm_outbox_timer(&mut self, wait: Duration) {
        if self.outbox_timer_armed {
            return;
        }
        self.outbox_timer_armed = true;
        let work_tx = self.work_tx.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(wait) => {
                    let _ = work_tx.send(Control::OutboxDue).await;
                }
            }
        });
    }

    fn arm_deadline(&self, correlation: CorrelationId) {
        let work_tx = self.work_tx.clone();
        let timeout = self.config.command_timeout;
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    let _ = work_tx.send(Control::CommandDeadline { correlation }).await;
                }
            }
        });
    }

    // ── Reconnection ────────────────────────────────────────────────────

    async fn schedule_reconnect(&mut self, attempt: u32) {
        if let Some(max) = self.config.reconnect.max_retries {
            if attempt > max {
                warn!(attempts = max, "reconnect attempts exhausted, giving up");
                self.epoch += 1;
                self.fail_all_pending(|| CommandError::Disconnected);
                // Stop the transport's own redial loop, or it keeps dialing
                // a session nobody is driving anymore.
                if let Err(error) = self.transport.disconnect().await {
                    debug!(%error, "transport disconnect after retry exhaustion");
                }
                self.set_state(ConnectionState::Disconnected);
                return;
            }
        }
        let delay = self.config.reconnect.delay_for(attempt);
        debug!(attempt, ?delay, "scheduling reconnect attempt");
        let work_tx = self.work_tx.clone();
        let epoch = self.epoch;
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = work_tx.send(Control::ReconnectDue { attempt, epoch }).await;
                }
            }
        });
    }

    async fn handle_reconnect_due(&mut self, attempt: u32, epoch: u64) {
        if epoch != self.epoch {
            return;
        }
        if !matches!(
            self.current_state(),
            ConnectionState::Interrupted | ConnectionState::Reconnecting { .. }
        ) {
            return;
        }
        self.set_state(ConnectionState::Reconnecting { attempt });
        info!(attempt, "attempting reconnect");
        if let Err(error) = self.transport.reconnect().await {
            warn!(attempt, %error, "reconnect attempt failed");
            self.schedule_reconnect(attempt + 1).await;
        }
        // Success is confirmed by TransportEvent::Resumed.
    }

    // ── Teardown ────────────────────────────────────────────────────────

    fn fail_all_pending(&mut self, error: impl Fn() -> CommandError) {
        self.outbox.clear();
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(error()));
        }
    }

    async fn shutdown(&mut self) {
        self.fail_all_pending(|| CommandError::SessionClosed);
        if let Err(error) = self.transport.disconnect().await {
            debug!(%error, "transport disconnect at shutdown");
        }
        self.set_state(ConnectionState::Disconnected);
        self.cancel.cancel();
        debug!("session engine stopped");
    }
}

// ── Public handle ───────────────────────────────────────────────────────────

struct Identity {
    client_id: String,
    session_id: String,
}

/// Handle to a running session engine. Cloning is cheap; all clones talk to
/// the same engine. When the last clone is dropped the engine shuts down
/// and fails any still-pending commands.
#[derive(Clone)]
pub struct Session {
    ctrl_tx: mpsc::Sender<Control>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    identity: Arc<Identity>,
}

impl Session {
    /// Spawn the engine task and return its handle. Nothing touches the
    /// network until [`Session::connect`].
    pub fn spawn(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let (ctrl_tx, ctrl_rx) = mpsc::channel(64);
        let (transport_tx, transport_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();
        let identity = Arc::new(Identity {
            client_id: config.client_id.clone(),
            session_id: config.session_id.clone(),
        });
        let engine = Engine {
            config,
            transport,
            transport_tx,
            work_tx: ctrl_tx.clone(),
            state: state_tx,
            cancel: cancel.clone(),
            bus: EventBus::new(),
            devices: Vec::new(),
            snapshots: HashMap::new(),
            pending: HashMap::new(),
            outbox: VecDeque::new(),
            seq: 0,
            epoch: 0,
            last_publish: HashMap::new(),
            outbox_timer_armed: false,
        };
        tokio::spawn(engine.run(ctrl_rx, transport_rx));
        Self {
            ctrl_tx,
            state_rx,
            cancel,
            identity,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.identity.client_id
    }

    pub fn session_id(&self) -> &str {
        &self.identity.session_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for connection-state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Stop the engine immediately, failing pending commands.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Control,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.ctrl_tx
            .send(make(tx))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    pub async fn connect(&self) -> Result<(), SessionError> {
        self.request(|reply| Control::Connect { reply }).await?
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| Control::Disconnect { reply }).await?
    }

    /// Register a device: its topics are subscribed now if connected, and
    /// re-established on every future (re)connect.
    pub async fn watch(&self, device: &Device) -> Result<(), SessionError> {
        let device = device.clone();
        self.request(|reply| Control::Watch { device, reply }).await?
    }

    pub async fn unwatch(&self, device: &MacAddress) -> Result<(), SessionError> {
        let device = device.clone();
        self.request(|reply| Control::Unwatch { device, reply })
            .await?
    }

    /// Register a synchronous listener at default priority.
    pub async fn on<F>(&self, kind: EventKind, callback: F) -> Result<ListenerId, SessionError>
    where
        F: FnMut(&Event) -> Result<(), crate::bus::ListenerError> + Send + 'static,
    {
        self.subscribe(kind, 0, false, Callback::sync(callback))
            .await
    }

    /// Register a synchronous listener at an explicit priority. Higher
    /// priorities run first.
    pub async fn on_with_priority<F>(
        &self,
        kind: EventKind,
        priority: i32,
        callback: F,
    ) -> Result<ListenerId, SessionError>
    where
        F: FnMut(&Event) -> Result<(), crate::bus::ListenerError> + Send + 'static,
    {
        self.subscribe(kind, priority, false, Callback::sync(callback))
            .await
    }

    /// Register a listener that is removed after its first delivery.
    pub async fn once<F>(&self, kind: EventKind, callback: F) -> Result<ListenerId, SessionError>
    where
        F: FnMut(&Event) -> Result<(), crate::bus::ListenerError> + Send + 'static,
    {
        self.subscribe(kind, 0, true, Callback::sync(callback)).await
    }

    /// Register an async listener. The engine awaits it before moving to
    /// the next listener, so it must not itself wait on this session's
    /// commands; spawn a task for that.
    pub async fn on_async<F, Fut>(
        &self,
        kind: EventKind,
        callback: F,
    ) -> Result<ListenerId, SessionError>
    where
        F: FnMut(Event) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), crate::bus::ListenerError>> + Send + 'static,
    {
        self.subscribe(kind, 0, false, Callback::async_fn(callback))
            .await
    }

    async fn subscribe(
        &self,
        kind: EventKind,
        priority: i32,
        once: bool,
        callback: Callback,
    ) -> Result<ListenerId, SessionError> {
        self.request(|reply| Control::Subscribe {
            kind,
            priority,
            once,
            callback,
            reply,
        })
        .await
    }

    /// Remove one listener. `Ok(false)` when it was already gone.
    pub async fn off(&self, id: ListenerId) -> Result<bool, SessionError> {
        self.request(|reply| Control::Unsubscribe { id, reply }).await
    }

    /// Remove every listener of one kind, returning how many were dropped.
    pub async fn off_all(&self, kind: EventKind) -> Result<usize, SessionError> {
        self.request(|reply| Control::UnsubscribeAll { kind, reply })
            .await
    }

    pub async fn listener_count(&self, kind: EventKind) -> Result<usize, SessionError> {
        self.request(|reply| Control::ListenerCount { kind, reply })
            .await
    }

    /// Kinds that currently have at least one listener.
    pub async fn active_kinds(&self) -> Result<Vec<EventKind>, SessionError> {
        self.request(|reply| Control::ActiveKinds { reply }).await
    }

    /// How many events of `kind` the session has published so far.
    pub async fn emitted(&self, kind: EventKind) -> Result<u64, SessionError> {
        self.request(|reply| Control::Emitted { kind, reply }).await
    }

    /// Latest stored snapshot for a device, if any payload arrived yet.
    pub async fn snapshot(
        &self,
        device: &MacAddress,
        category: SnapshotCategory,
    ) -> Result<Option<Arc<DeviceSnapshot>>, SessionError> {
        let device = device.clone();
        self.request(|reply| Control::Snapshot {
            device,
            category,
            reply,
        })
        .await
    }

    /// Submit a prebuilt command envelope and wait for its outcome.
    pub async fn submit(&self, envelope: CommandEnvelope) -> Result<CommandAck, CommandError> {
        let (tx, rx) = oneshot::channel();
        self.ctrl_tx
            .send(Control::Submit {
                envelope,
                reply: tx,
            })
            .await
            .map_err(|_| CommandError::SessionClosed)?;
        rx.await.map_err(|_| CommandError::SessionClosed)?
    }

    /// Block until the next event of `kind`, up to `timeout`.
    pub async fn wait_for(
        &self,
        kind: EventKind,
        timeout: Duration,
    ) -> Result<Event, SessionError> {
        let (tx, rx) = oneshot::channel();
        let mut slot = Some(tx);
        let callback = Callback::sync(move |event: &Event| {
            if let Some(tx) = slot.take() {
                let _ = tx.send(event.clone());
            }
            Ok(())
        });
        let id = self.subscribe(kind, 0, true, callback).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(SessionError::SessionClosed),
            Err(_) => {
                let _ = self.off(id).await;
                Err(SessionError::WaitTimeout { kind })
            }
        }
    }
}
