//! Pure inbound-message decoding.
//!
//! [`decode`] turns one `(topic, payload)` pair into a typed [`Inbound`]
//! without touching any connection or session state, so it can be exercised
//! directly in tests with literal frames.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::{CommandKind, CorrelationId, ReservationEntry};
use crate::device::MacAddress;
use crate::error::DecodeError;
use crate::field::{decode_fields, FieldId, FieldValue, FEATURE_FIELDS, STATUS_FIELDS};

/// A decoded inbound message.
#[derive(Debug)]
pub struct Inbound {
    pub device: MacAddress,
    /// Echoed correlation token, absent on unsolicited broadcasts.
    pub correlation: Option<CorrelationId>,
    pub command: u32,
    pub kind: InboundKind,
}

#[derive(Debug)]
pub enum InboundKind {
    /// A full status payload, solicited or broadcast.
    Status(BTreeMap<FieldId, FieldValue>),
    /// A device-info (feature/capability) payload.
    Feature(BTreeMap<FieldId, FieldValue>),
    /// Daily energy-usage history.
    EnergyUsage(EnergyUsageReport),
    /// The device's stored weekly reservation program.
    Reservation(ReservationSchedule),
    /// Acknowledgement of a control command.
    Ack(AckStatus),
}

/// Weekly reservation program as the device reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservationSchedule {
    #[serde(rename = "reservationUse", default)]
    pub reservation_use: u8,
    #[serde(rename = "reservation", default)]
    pub entries: Vec<ReservationEntry>,
}

impl ReservationSchedule {
    /// Whether the program as a whole is switched on (1 on the wire).
    pub fn enabled(&self) -> bool {
        self.reservation_use == 1
    }
}

/// Device verdict on a control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Accepted,
    /// The device refused the command; `code` is its reason code.
    Rejected { code: u32 },
}

/// Cumulative energy counters since installation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyUsageTotal {
    #[serde(rename = "hpUsage", default)]
    pub heat_pump_wh: i64,
    #[serde(rename = "heUsage", default)]
    pub element_wh: i64,
    #[serde(rename = "hpTime", default)]
    pub heat_pump_hours: i64,
    #[serde(rename = "heTime", default)]
    pub element_hours: i64,
}

impl EnergyUsageTotal {
    pub fn total_wh(&self) -> i64 {
        self.heat_pump_wh + self.element_wh
    }

    /// Fraction of total energy delivered by the heat pump, 0.0..=1.0.
    pub fn heat_pump_share(&self) -> f64 {
        let total = self.total_wh();
        if total == 0 {
            return 0.0;
        }
        self.heat_pump_wh as f64 / total as f64
    }
}

/// One day's counters within a month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyUsageDay {
    #[serde(rename = "hpUsage", default)]
    pub heat_pump_wh: i64,
    #[serde(rename = "heUsage", default)]
    pub element_wh: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyMonth {
    #[serde(default)]
    pub year: u16,
    #[serde(default)]
    pub month: u8,
    /// One entry per day, index 0 = the 1st.
    #[serde(default)]
    pub data: Vec<EnergyUsageDay>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyUsageReport {
    #[serde(default)]
    pub total: EnergyUsageTotal,
    #[serde(default)]
    pub usage: Vec<EnergyMonth>,
}

enum Channel {
    Response,
    Broadcast,
}

/// Classify a topic and pull the device MAC out of its `navilink-` segment
/// when present. The suffixed response branches omit the device segment.
fn classify_topic(topic: &str) -> Result<(Channel, Option<MacAddress>), DecodeError> {
    let mut segments = topic.split('/');
    let channel = match segments.next() {
        Some("cmd") => Channel::Response,
        Some("evt") => Channel::Broadcast,
        _ => {
            return Err(DecodeError::UnrecognizedTopic {
                topic: topic.to_owned(),
            })
        }
    };
    let mut mac = None;
    let mut saw_res = false;
    for segment in segments {
        if let Some(suffix) = segment.strip_prefix("navilink-") {
            mac = Some(MacAddress::new(suffix));
        }
        if segment == "res" {
            saw_res = true;
        }
    }
    if matches!(channel, Channel::Response) && !saw_res {
        // Command topics other than the response branch are outbound only.
        return Err(DecodeError::UnrecognizedTopic {
            topic: topic.to_owned(),
        });
    }
    Ok((channel, mac))
}

fn malformed(topic: &str, reason: impl ToString) -> DecodeError {
    DecodeError::MalformedPayload {
        topic: topic.to_owned(),
        reason: reason.to_string(),
    }
}

/// Decode one inbound frame.
///
/// Payloads are JSON envelopes whose body sits under `response` (solicited)
/// or at the top level (broadcast). Unknown body keys are ignored; a
/// `requestID` anywhere in the envelope becomes the correlation token.
pub fn decode(topic: &str, payload: &[u8]) -> Result<Inbound, DecodeError> {
    let (channel, topic_mac) = classify_topic(topic)?;

    let root: Value = serde_json::from_slice(payload).map_err(|e| malformed(topic, e))?;
    let root = root
        .as_object()
        .ok_or_else(|| malformed(topic, "payload is not a JSON object"))?;

    let correlation = root
        .get("requestID")
        .and_then(Value::as_str)
        .and_then(CorrelationId::parse);

    let body = match root.get("response") {
        Some(Value::Object(inner)) => inner,
        Some(_) => return Err(malformed(topic, "`response` is not an object")),
        None => root,
    };

    let device = topic_mac
        .or_else(|| {
            body.get("macAddress")
                .and_then(Value::as_str)
                .map(MacAddress::new)
        })
        .ok_or_else(|| DecodeError::MissingField {
            topic: topic.to_owned(),
            field: "macAddress",
        })?;

    let command = body
        .get("command")
        .and_then(Value::as_u64)
        .and_then(|c| u32::try_from(c).ok())
        .ok_or_else(|| DecodeError::MissingField {
            topic: topic.to_owned(),
            field: "command",
        })?;

    let kind = match CommandKind::from_code(command) {
        Some(CommandKind::StatusRequest) => InboundKind::Status(decode_fields(STATUS_FIELDS, body)),
        Some(CommandKind::DeviceInfoRequest) => {
            InboundKind::Feature(decode_fields(FEATURE_FIELDS, body))
        }
        Some(CommandKind::EnergyUsageQuery) => {
            let report: EnergyUsageReport =
                serde_json::from_value(Value::Object(body.clone()))
                    .map_err(|e| malformed(topic, e))?;
            InboundKind::EnergyUsage(report)
        }
        // Reads and updates share the code; only reads answer with the
        // stored program, updates come back as a bare acknowledgement.
        Some(CommandKind::ReservationRead)
            if body.contains_key("reservation") || body.contains_key("reservationUse") =>
        {
            let schedule: ReservationSchedule =
                serde_json::from_value(Value::Object(body.clone()))
                    .map_err(|e| malformed(topic, e))?;
            InboundKind::Reservation(schedule)
        }
        Some(_) => {
            let reject = body
                .get("errorCode")
                .and_then(Value::as_u64)
                .and_then(|c| u32::try_from(c).ok())
                .filter(|c| *c != 0);
            InboundKind::Ack(match reject {
                Some(code) => AckStatus::Rejected { code },
                None => AckStatus::Accepted,
            })
        }
        None => {
            return Err(DecodeError::UnknownCommand {
                topic: topic.to_owned(),
                code: command,
            })
        }
    };

    // Broadcast frames never carry a correlation; a stale echo there would
    // otherwise resolve a pending command it does not answer.
    let correlation = match channel {
        Channel::Response => correlation,
        Channel::Broadcast => None,
    };

    Ok(Inbound {
        device,
        correlation,
        command,
        kind,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const RES_TOPIC: &str = "cmd/52/navilink-047863aabbcc/tanklink-1/res";

    fn frame(body: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "clientID": "device",
            "sessionID": "s",
            "requestID": "0191d7a0-0000-7000-8000-000000000001",
            "protocolVersion": 2,
            "response": body,
        }))
        .unwrap()
    }

    #[test]
    fn status_response_decodes_fields_and_correlation() {
        let payload = frame(json!({
            "command": 16_777_219,
            "temperatureType": 2,
            "dhwTemperature": 104,
            "compUse": 2,
            "errorCode": 0,
        }));
        let inbound = decode(RES_TOPIC, &payload).unwrap();
        assert_eq!(inbound.device.as_str(), "047863aabbcc");
        assert!(inbound.correlation.is_some());
        let InboundKind::Status(fields) = inbound.kind else {
            panic!("expected status");
        };
        assert_eq!(fields.get("dhw_temperature"), Some(&FieldValue::Number(125.6)));
        assert_eq!(
            fields.get("compressor_running"),
            Some(&FieldValue::Bool(true))
        );
    }

    #[test]
    fn control_ack_reports_accept_and_reject() {
        let accepted = decode(RES_TOPIC, &frame(json!({"command": 33_554_434}))).unwrap();
        assert!(matches!(accepted.kind, InboundKind::Ack(AckStatus::Accepted)));

        let rejected = decode(
            RES_TOPIC,
            &frame(json!({"command": 33_554_464, "errorCode": 515})),
        )
        .unwrap();
        assert!(matches!(
            rejected.kind,
            InboundKind::Ack(AckStatus::Rejected { code: 515 })
        ));
    }

    #[test]
    fn suffixed_response_topic_takes_mac_from_payload() {
        let payload = frame(json!({
            "command": 16_777_225,
            "macAddress": "047863AABBCC",
            "total": {"hpUsage": 9000, "heUsage": 1000},
            "usage": [{"year": 2026, "month": 8, "data": [{"hpUsage": 300, "heUsage": 0}]}],
        }));
        let inbound = decode("cmd/52/tanklink-1/res/energy-usage-daily-query/rd", &payload).unwrap();
        assert_eq!(inbound.device.as_str(), "047863aabbcc");
        let InboundKind::EnergyUsage(report) = inbound.kind else {
            panic!("expected energy usage");
        };
        assert_eq!(report.total.total_wh(), 10_000);
        assert!((report.total.heat_pump_share() - 0.9).abs() < 1e-9);
        assert_eq!(report.usage[0].data.len(), 1);
    }

    #[test]
    fn reservation_read_response_carries_the_stored_program() {
        let payload = frame(json!({
            "command": 16_777_226,
            "macAddress": "047863aabbcc",
            "reservationUse": 1,
            "reservation": [
                {"enable": 1, "week": 62, "hour": 6, "min": 30, "mode": 1, "param": [120]},
            ],
        }));
        let inbound = decode("cmd/52/tanklink-1/res/rsv/rd", &payload).unwrap();
        assert!(inbound.correlation.is_some());
        let InboundKind::Reservation(schedule) = inbound.kind else {
            panic!("expected reservation schedule");
        };
        assert!(schedule.enabled());
        assert_eq!(schedule.entries.len(), 1);
        assert_eq!(schedule.entries[0].hour, 6);

        // An update confirmation has no program attached.
        let ack = decode(
            "cmd/52/tanklink-1/res/rsv/rd",
            &frame(json!({"command": 16_777_226, "macAddress": "047863aabbcc"})),
        )
        .unwrap();
        assert!(matches!(ack.kind, InboundKind::Ack(AckStatus::Accepted)));
    }

    #[test]
    fn broadcast_status_decodes_without_correlation() {
        let payload = serde_json::to_vec(&json!({
            "command": 16_777_219,
            "requestID": "0191d7a0-0000-7000-8000-000000000001",
            "dhwChargePer": 87,
        }))
        .unwrap();
        let inbound = decode("evt/52/navilink-047863aabbcc/st", &payload).unwrap();
        assert!(inbound.correlation.is_none());
        let InboundKind::Status(fields) = inbound.kind else {
            panic!("expected status");
        };
        assert_eq!(fields.get("dhw_charge_percent"), Some(&FieldValue::Number(87.0)));
    }

    #[test]
    fn malformed_frames_map_to_decode_errors() {
        assert!(matches!(
            decode("shadow/update", b"{}"),
            Err(DecodeError::UnrecognizedTopic { .. })
        ));
        assert!(matches!(
            decode(RES_TOPIC, b"not json"),
            Err(DecodeError::MalformedPayload { .. })
        ));
        assert!(matches!(
            decode(RES_TOPIC, &frame(json!({"dhwTemperature": 104}))),
            Err(DecodeError::MissingField { field: "command", .. })
        ));
        assert!(matches!(
            decode(RES_TOPIC, &frame(json!({"command": 99}))),
            Err(DecodeError::UnknownCommand { code: 99, .. })
        ));
        assert!(matches!(
            decode("cmd/52/navilink-047863aabbcc/ctrl", b"{}"),
            Err(DecodeError::UnrecognizedTopic { .. })
        ));
    }
}
