//! State-change detection between consecutive snapshots.
//!
//! Pure: given the previous and the new snapshot of one `(device,
//! category)` pair, produce the derived events. The session engine owns the
//! previous-snapshot table and feeds this module on every receipt.

use std::collections::BTreeSet;
use std::sync::Arc;

use tanklink_proto::FieldId;

use crate::event::Event;
use crate::snapshot::{DeviceSnapshot, SnapshotCategory};

/// Which fields produce [`Event::FieldChanged`] when their value moves.
#[derive(Debug, Clone)]
pub struct WatchedFields(Vec<FieldId>);

impl Default for WatchedFields {
    fn default() -> Self {
        Self(vec![
            "dhw_temperature",
            "dhw_temperature_setting",
            "dhw_charge_percent",
            "instant_power",
            "operation_mode",
            "dhw_operation_setting",
            "dhw_enabled",
            "wifi_rssi",
        ])
    }
}

impl WatchedFields {
    pub fn new(fields: impl IntoIterator<Item = FieldId>) -> Self {
        Self(fields.into_iter().collect())
    }

    pub fn fields(&self) -> &[FieldId] {
        &self.0
    }
}

/// Diff `next` against `previous` and return the derived events, in a fixed
/// order: field changes, then heating edges, then error transitions.
///
/// With no previous snapshot there is nothing to compare, so the first
/// receipt yields no derived events even when heat sources are already
/// running or errors are already present.
pub fn diff(
    watched: &WatchedFields,
    previous: Option<&DeviceSnapshot>,
    next: &Arc<DeviceSnapshot>,
) -> Vec<Event> {
    let Some(previous) = previous else {
        return Vec::new();
    };
    let mut events = Vec::new();

    for field in watched.fields().iter().copied() {
        // A field absent on either side is not a change; partial payloads
        // must not look like transitions.
        let (Some(old), Some(new)) = (previous.get(field), next.get(field)) else {
            continue;
        };
        if old != new {
            events.push(Event::FieldChanged {
                device: next.device.clone(),
                field,
                previous: old.clone(),
                current: new.clone(),
                snapshot: Arc::clone(next),
            });
        }
    }

    if next.category == SnapshotCategory::Status {
        match (previous.heating_active(), next.heating_active()) {
            (false, true) => events.push(Event::HeatingStarted {
                snapshot: Arc::clone(next),
            }),
            (true, false) => events.push(Event::HeatingStopped {
                snapshot: Arc::clone(next),
            }),
            _ => {}
        }

        let before: BTreeSet<u32> = previous.active_error_codes().into_iter().collect();
        let after: BTreeSet<u32> = next.active_error_codes().into_iter().collect();
        for code in after.difference(&before) {
            events.push(Event::ErrorRaised {
                device: next.device.clone(),
                code: *code,
                snapshot: Arc::clone(next),
            });
        }
        for code in before.difference(&after) {
            events.push(Event::ErrorCleared {
                device: next.device.clone(),
                code: *code,
                snapshot: Arc::clone(next),
            });
        }
    }

    events
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tanklink_proto::{FieldValue, MacAddress};

    use super::*;
    use crate::event::EventKind;

    fn status(seq: u64, fields: &[(FieldId, FieldValue)]) -> Arc<DeviceSnapshot> {
        Arc::new(DeviceSnapshot {
            device: MacAddress::new("047863aabbcc"),
            category: SnapshotCategory::Status,
            seq,
            received_at: Utc::now(),
            fields: fields.iter().cloned().collect(),
        })
    }

    fn kinds(events: &[Event]) -> Vec<EventKind> {
        events.iter().map(Event::kind).collect()
    }

    #[test]
    fn first_snapshot_yields_no_derived_events() {
        let next = status(
            1,
            &[
                ("compressor_running", FieldValue::Bool(true)),
                ("error_code", FieldValue::Number(515.0)),
            ],
        );
        assert!(diff(&WatchedFields::default(), None, &next).is_empty());
    }

    #[test]
    fn field_change_reports_old_and_new_value() {
        let watched = WatchedFields::default();
        let prev = status(1, &[("dhw_temperature", FieldValue::Number(120.0))]);
        let next = status(2, &[("dhw_temperature", FieldValue::Number(121.5))]);
        let events = diff(&watched, Some(prev.as_ref()), &next);
        assert_eq!(events.len(), 1);
        let Event::FieldChanged {
            field,
            previous,
            current,
            ..
        } = &events[0]
        else {
            panic!("expected field change");
        };
        assert_eq!(*field, "dhw_temperature");
        assert_eq!(*previous, FieldValue::Number(120.0));
        assert_eq!(*current, FieldValue::Number(121.5));
    }

    #[test]
    fn missing_field_on_either_side_is_not_a_change() {
        let watched = WatchedFields::default();
        let prev = status(1, &[("dhw_temperature", FieldValue::Number(120.0))]);
        let next = status(2, &[("dhw_charge_percent", FieldValue::Number(80.0))]);
        assert!(diff(&watched, Some(prev.as_ref()), &next).is_empty());
    }

    #[test]
    fn heating_edges_need_a_transition() {
        let watched = WatchedFields::default();
        let idle = status(1, &[("compressor_running", FieldValue::Bool(false))]);
        let pumping = status(2, &[("compressor_running", FieldValue::Bool(true))]);
        let element = status(3, &[("upper_element_running", FieldValue::Bool(true))]);

        assert_eq!(
            kinds(&diff(&watched, Some(idle.as_ref()), &pumping)),
            vec![EventKind::HeatingStarted]
        );
        // Compressor off but element on: still heating, no edge.
        assert!(diff(&watched, Some(pumping.as_ref()), &element).is_empty());
        assert_eq!(
            kinds(&diff(&watched, Some(element.as_ref()), &idle)),
            vec![EventKind::HeatingStopped]
        );
        assert!(diff(&watched, Some(pumping.as_ref()), &pumping).is_empty());
    }

    #[test]
    fn error_codes_raise_and_clear_independently() {
        let watched = WatchedFields::default();
        let clean = status(
            1,
            &[
                ("error_code", FieldValue::Number(0.0)),
                ("sub_error_code", FieldValue::Number(0.0)),
            ],
        );
        let faulted = status(
            2,
            &[
                ("error_code", FieldValue::Number(515.0)),
                ("sub_error_code", FieldValue::Number(12.0)),
            ],
        );
        let partial = status(
            3,
            &[
                ("error_code", FieldValue::Number(515.0)),
                ("sub_error_code", FieldValue::Number(0.0)),
            ],
        );

        let raised = diff(&watched, Some(clean.as_ref()), &faulted);
        assert_eq!(
            kinds(&raised),
            vec![EventKind::ErrorRaised, EventKind::ErrorRaised]
        );

        let cleared = diff(&watched, Some(faulted.as_ref()), &partial);
        assert_eq!(kinds(&cleared), vec![EventKind::ErrorCleared]);
        let Event::ErrorCleared { code, .. } = &cleared[0] else {
            panic!("expected error cleared");
        };
        assert_eq!(*code, 12);
    }

    #[test]
    fn unwatched_fields_do_not_emit_changes() {
        let watched = WatchedFields::new(["dhw_temperature"]);
        let prev = status(1, &[("target_fan_rpm", FieldValue::Number(1000.0))]);
        let next = status(2, &[("target_fan_rpm", FieldValue::Number(2000.0))]);
        assert!(diff(&watched, Some(prev.as_ref()), &next).is_empty());
    }
}
