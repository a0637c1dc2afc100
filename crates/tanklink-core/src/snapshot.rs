//! Immutable device-state snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tanklink_proto::{FieldId, FieldValue, MacAddress};

/// Which payload family a snapshot was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotCategory {
    /// Operational telemetry (temperatures, modes, errors).
    Status,
    /// Static capabilities and firmware versions.
    Feature,
}

/// One decoded device payload, frozen at receipt.
///
/// Snapshots are shared behind `Arc` between the session's own state table
/// and every event that references them, so listeners can hold on to one
/// without blocking later updates.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub device: MacAddress,
    pub category: SnapshotCategory,
    /// Session-wide receipt counter; later snapshots compare greater.
    pub seq: u64,
    pub received_at: DateTime<Utc>,
    pub fields: BTreeMap<FieldId, FieldValue>,
}

impl DeviceSnapshot {
    pub fn get(&self, field: FieldId) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Numeric field accessor; `None` when absent or non-numeric.
    pub fn number(&self, field: FieldId) -> Option<f64> {
        self.fields.get(field).and_then(FieldValue::as_f64)
    }

    /// Boolean field accessor; `None` when absent or non-boolean.
    pub fn flag(&self, field: FieldId) -> Option<bool> {
        self.fields.get(field).and_then(FieldValue::as_bool)
    }

    /// True while any heat source is actively running.
    pub fn heating_active(&self) -> bool {
        self.flag("compressor_running").unwrap_or(false)
            || self.flag("upper_element_running").unwrap_or(false)
            || self.flag("lower_element_running").unwrap_or(false)
    }

    /// Nonzero error codes currently reported by this snapshot.
    pub fn active_error_codes(&self) -> Vec<u32> {
        ["error_code", "sub_error_code"]
            .into_iter()
            .filter_map(|field| self.number(field))
            .map(|n| n as u32)
            .filter(|code| *code != 0)
            .collect()
    }
}
