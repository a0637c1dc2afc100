//! Session events.

use std::sync::Arc;

use tanklink_proto::{FieldId, FieldValue, MacAddress};

use crate::snapshot::DeviceSnapshot;

/// The event classes listeners can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StatusReceived,
    FeatureReceived,
    FieldChanged,
    HeatingStarted,
    HeatingStopped,
    ErrorRaised,
    ErrorCleared,
    ConnectionInterrupted,
    ConnectionResumed,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        Self::StatusReceived,
        Self::FeatureReceived,
        Self::FieldChanged,
        Self::HeatingStarted,
        Self::HeatingStopped,
        Self::ErrorRaised,
        Self::ErrorCleared,
        Self::ConnectionInterrupted,
        Self::ConnectionResumed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusReceived => "status_received",
            Self::FeatureReceived => "feature_received",
            Self::FieldChanged => "field_changed",
            Self::HeatingStarted => "heating_started",
            Self::HeatingStopped => "heating_stopped",
            Self::ErrorRaised => "error_raised",
            Self::ErrorCleared => "error_cleared",
            Self::ConnectionInterrupted => "connection_interrupted",
            Self::ConnectionResumed => "connection_resumed",
        }
    }
}

/// One published event. Snapshot-bearing variants share the session's own
/// `Arc`, so cloning an event is cheap.
#[derive(Debug, Clone)]
pub enum Event {
    /// A status payload arrived (solicited or broadcast).
    StatusReceived { snapshot: Arc<DeviceSnapshot> },
    /// A device-info payload arrived.
    FeatureReceived { snapshot: Arc<DeviceSnapshot> },
    /// A watched field's value differs from the previous snapshot.
    FieldChanged {
        device: MacAddress,
        field: FieldId,
        previous: FieldValue,
        current: FieldValue,
        snapshot: Arc<DeviceSnapshot>,
    },
    /// Some heat source went from all-idle to running.
    HeatingStarted { snapshot: Arc<DeviceSnapshot> },
    /// Every heat source went idle.
    HeatingStopped { snapshot: Arc<DeviceSnapshot> },
    /// A nonzero error code appeared that the previous snapshot lacked.
    ErrorRaised {
        device: MacAddress,
        code: u32,
        snapshot: Arc<DeviceSnapshot>,
    },
    /// A previously reported error code is gone.
    ErrorCleared {
        device: MacAddress,
        code: u32,
        snapshot: Arc<DeviceSnapshot>,
    },
    /// The transport dropped; recovery is starting.
    ConnectionInterrupted { reason: String },
    /// The transport is back up and subscriptions are restored.
    ConnectionResumed { session_preserved: bool },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StatusReceived { .. } => EventKind::StatusReceived,
            Self::FeatureReceived { .. } => EventKind::FeatureReceived,
            Self::FieldChanged { .. } => EventKind::FieldChanged,
            Self::HeatingStarted { .. } => EventKind::HeatingStarted,
            Self::HeatingStopped { .. } => EventKind::HeatingStopped,
            Self::ErrorRaised { .. } => EventKind::ErrorRaised,
            Self::ErrorCleared { .. } => EventKind::ErrorCleared,
            Self::ConnectionInterrupted { .. } => EventKind::ConnectionInterrupted,
            Self::ConnectionResumed { .. } => EventKind::ConnectionResumed,
        }
    }
}
