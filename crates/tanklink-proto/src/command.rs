//! Outbound command construction.
//!
//! Every operation is a JSON envelope published to a command topic. The
//! envelope names the topic the device should answer on and carries a
//! `requestID` the device echoes back, which is the sole correlation
//! mechanism between submissions and acknowledgements.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::{Device, MacAddress};
use crate::error::ValidationError;
use crate::topic;

/// Envelope protocol version the NWP500 cloud speaks.
pub const PROTOCOL_VERSION: u8 = 2;

/// Temperature setpoint range the device accepts, in °F.
pub const DHW_TEMPERATURE_MIN_F: f64 = 95.0;
pub const DHW_TEMPERATURE_MAX_F: f64 = 150.0;

/// Correlation token generated per submission and echoed in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Every operation the client can ask of a device, with its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    StatusRequest,
    DeviceInfoRequest,
    EnergyUsageQuery,
    ReservationRead,
    ReservationUpdate,
    PowerOff,
    PowerOn,
    TouOff,
    TouOn,
    DhwMode,
    TouSchedule,
    RecirculationHotButton,
    RecirculationMode,
    DhwTemperature,
    VacationDays,
    DemandResponseOff,
    DemandResponseOn,
    AntiLegionellaOff,
    AntiLegionellaOn,
    AirFilterReset,
}

impl CommandKind {
    pub fn code(self) -> u32 {
        match self {
            Self::DeviceInfoRequest => 16_777_217,
            Self::StatusRequest => 16_777_219,
            Self::EnergyUsageQuery => 16_777_225,
            Self::ReservationRead | Self::ReservationUpdate => 16_777_226,
            Self::PowerOff => 33_554_433,
            Self::PowerOn => 33_554_434,
            Self::TouOff => 33_554_435,
            Self::TouOn => 33_554_436,
            Self::DhwMode => 33_554_437,
            Self::TouSchedule => 33_554_439,
            Self::RecirculationHotButton => 33_554_444,
            Self::RecirculationMode => 33_554_445,
            Self::DhwTemperature => 33_554_464,
            Self::VacationDays => 33_554_466,
            Self::DemandResponseOff => 33_554_469,
            Self::DemandResponseOn => 33_554_470,
            Self::AntiLegionellaOff => 33_554_471,
            Self::AntiLegionellaOn => 33_554_472,
            Self::AirFilterReset => 33_554_473,
        }
    }

    /// Maps a response's echoed command code back to a kind.
    pub fn from_code(code: u32) -> Option<Self> {
        let kind = match code {
            16_777_217 => Self::DeviceInfoRequest,
            16_777_219 => Self::StatusRequest,
            16_777_225 => Self::EnergyUsageQuery,
            16_777_226 => Self::ReservationRead,
            33_554_433 => Self::PowerOff,
            33_554_434 => Self::PowerOn,
            33_554_435 => Self::TouOff,
            33_554_436 => Self::TouOn,
            33_554_437 => Self::DhwMode,
            33_554_439 => Self::TouSchedule,
            33_554_444 => Self::RecirculationHotButton,
            33_554_445 => Self::RecirculationMode,
            33_554_464 => Self::DhwTemperature,
            33_554_466 => Self::VacationDays,
            33_554_469 => Self::DemandResponseOff,
            33_554_470 => Self::DemandResponseOn,
            33_554_471 => Self::AntiLegionellaOff,
            33_554_472 => Self::AntiLegionellaOn,
            33_554_473 => Self::AirFilterReset,
            _ => return None,
        };
        Some(kind)
    }

    /// True for the read-style commands whose response is a data payload
    /// rather than a bare acknowledgement.
    pub fn is_query(self) -> bool {
        matches!(
            self,
            Self::StatusRequest
                | Self::DeviceInfoRequest
                | Self::EnergyUsageQuery
                | Self::ReservationRead
        )
    }
}

/// User-selectable DHW operation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DhwMode {
    HeatPump,
    Electric,
    EnergySaver,
    HighDemand,
    Vacation,
}

impl DhwMode {
    pub fn raw(self) -> i64 {
        match self {
            Self::HeatPump => 1,
            Self::Electric => 2,
            Self::EnergySaver => 3,
            Self::HighDemand => 4,
            Self::Vacation => 5,
        }
    }
}

/// One slot of the weekly reservation program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationEntry {
    pub enable: u8,
    /// Bitmask of weekdays, bit 0 = Sunday.
    pub week: u8,
    pub hour: u8,
    pub min: u8,
    pub mode: u8,
    pub param: Vec<i64>,
}

/// One time-of-use pricing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouPeriod {
    pub season: u8,
    pub week: u8,
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
    pub price_min: u32,
    pub price_max: u32,
    pub decimal_point: u8,
}

/// Body of the `reservation` key. The cloud reuses that key for both the
/// weekly program and the TOU schedule, distinguished only by the command
/// code next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReservationPayload {
    Program(Vec<ReservationEntry>),
    Tou(Vec<TouPeriod>),
}

/// Inner request object of the command envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command: u32,
    pub device_type: u16,
    pub mac_address: MacAddress,
    #[serde(default)]
    pub additional_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param_str: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_use: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationPayload>,
}

/// Full wire envelope published to a command topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "requestID")]
    pub request_id: CorrelationId,
    pub protocol_version: u8,
    pub request_topic: String,
    pub response_topic: String,
    pub request: CommandRequest,
}

impl CommandEnvelope {
    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::from_code(self.request.command)
    }

    pub fn device(&self) -> &MacAddress {
        &self.request.mac_address
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // The envelope is plain owned data; serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Builds envelopes for one device within one session.
///
/// Parameter validation happens here, before anything reaches the wire, so a
/// rejected value costs nothing and leaves no queued command behind.
pub struct CommandBuilder<'a> {
    client_id: &'a str,
    session_id: &'a str,
    device: &'a Device,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(client_id: &'a str, session_id: &'a str, device: &'a Device) -> Self {
        Self {
            client_id,
            session_id,
            device,
        }
    }

    fn envelope(&self, request_topic: String, response_topic: String, request: CommandRequest) -> CommandEnvelope {
        CommandEnvelope {
            client_id: self.client_id.to_owned(),
            session_id: self.session_id.to_owned(),
            request_id: CorrelationId::generate(),
            protocol_version: PROTOCOL_VERSION,
            request_topic,
            response_topic,
            request,
        }
    }

    fn request(&self, kind: CommandKind) -> CommandRequest {
        CommandRequest {
            command: kind.code(),
            device_type: self.device.device_type,
            mac_address: self.device.mac_address.clone(),
            additional_value: self.device.additional_value.clone(),
            mode: None,
            param: None,
            param_str: None,
            year: None,
            month: None,
            controller_serial_number: None,
            reservation_use: None,
            reservation: None,
        }
    }

    fn control(&self, kind: CommandKind, mode: &str, param: Vec<i64>) -> CommandEnvelope {
        let mut request = self.request(kind);
        request.mode = Some(mode.to_owned());
        if !param.is_empty() {
            request.param = Some(param);
        }
        self.envelope(
            topic::control(self.device),
            topic::response(self.device, self.client_id),
            request,
        )
    }

    pub fn status_request(&self) -> CommandEnvelope {
        self.envelope(
            topic::status_request(self.device),
            topic::response(self.device, self.client_id),
            self.request(CommandKind::StatusRequest),
        )
    }

    pub fn device_info_request(&self) -> CommandEnvelope {
        self.envelope(
            topic::device_info_request(self.device),
            topic::response(self.device, self.client_id),
            self.request(CommandKind::DeviceInfoRequest),
        )
    }

    pub fn power(&self, on: bool) -> CommandEnvelope {
        let (kind, mode) = if on {
            (CommandKind::PowerOn, "power-on")
        } else {
            (CommandKind::PowerOff, "power-off")
        };
        self.control(kind, mode, vec![])
    }

    /// Select a DHW operation mode. Vacation additionally takes a duration
    /// of 1..=30 days.
    pub fn dhw_mode(
        &self,
        mode: DhwMode,
        vacation_days: Option<u16>,
    ) -> Result<CommandEnvelope, ValidationError> {
        let mut param = vec![mode.raw()];
        match (mode, vacation_days) {
            (DhwMode::Vacation, Some(days)) => {
                ValidationError::range_check("vacation days", f64::from(days), 1.0, 30.0)?;
                param.push(i64::from(days));
            }
            (DhwMode::Vacation, None) => {
                return Err(ValidationError::Parameter {
                    parameter: "vacation days",
                    reason: "required when selecting vacation mode",
                });
            }
            (_, Some(_)) => {
                return Err(ValidationError::Parameter {
                    parameter: "vacation days",
                    reason: "only valid with vacation mode",
                });
            }
            (_, None) => {}
        }
        Ok(self.control(CommandKind::DhwMode, "dhw-mode", param))
    }

    /// Set the tank setpoint in °F. The device stores half-degrees Celsius.
    pub fn dhw_temperature(&self, fahrenheit: f64) -> Result<CommandEnvelope, ValidationError> {
        ValidationError::range_check(
            "DHW temperature",
            fahrenheit,
            DHW_TEMPERATURE_MIN_F,
            DHW_TEMPERATURE_MAX_F,
        )?;
        let half_celsius = fahrenheit_to_half_celsius(fahrenheit);
        Ok(self.control(CommandKind::DhwTemperature, "dhw-temperature", vec![half_celsius]))
    }

    /// Extend or shorten an active vacation, 1..=365 days.
    pub fn vacation_days(&self, days: u16) -> Result<CommandEnvelope, ValidationError> {
        ValidationError::range_check("vacation days", f64::from(days), 1.0, 365.0)?;
        Ok(self.control(CommandKind::VacationDays, "goout-day", vec![i64::from(days)]))
    }

    /// Enable the anti-legionella cycle with a period of 1..=30 days, or
    /// disable it.
    pub fn anti_legionella(
        &self,
        period_days: Option<u8>,
    ) -> Result<CommandEnvelope, ValidationError> {
        match period_days {
            Some(days) => {
                ValidationError::range_check(
                    "anti-legionella period",
                    f64::from(days),
                    1.0,
                    30.0,
                )?;
                Ok(self.control(
                    CommandKind::AntiLegionellaOn,
                    "anti-leg-on",
                    vec![i64::from(days)],
                ))
            }
            None => Ok(self.control(
                CommandKind::AntiLegionellaOff,
                "anti-leg-off",
                vec![],
            )),
        }
    }

    pub fn demand_response(&self, enrolled: bool) -> CommandEnvelope {
        let (kind, mode) = if enrolled {
            (CommandKind::DemandResponseOn, "dr-on")
        } else {
            (CommandKind::DemandResponseOff, "dr-off")
        };
        self.control(kind, mode, vec![])
    }

    pub fn air_filter_reset(&self) -> CommandEnvelope {
        self.control(CommandKind::AirFilterReset, "air-filter-reset", vec![])
    }

    pub fn tou_enabled(&self, enabled: bool) -> CommandEnvelope {
        let (kind, mode) = if enabled {
            (CommandKind::TouOn, "tou-on")
        } else {
            (CommandKind::TouOff, "tou-off")
        };
        self.control(kind, mode, vec![])
    }

    /// Write the time-of-use schedule. Requires the controller serial the
    /// utility program is registered under. The periods travel under the
    /// `reservation` key next to `reservationUse`, same as the weekly
    /// program.
    pub fn tou_schedule(
        &self,
        controller_serial: &str,
        periods: Vec<TouPeriod>,
        enabled: bool,
    ) -> Result<CommandEnvelope, ValidationError> {
        if controller_serial.is_empty() {
            return Err(ValidationError::Parameter {
                parameter: "controller serial",
                reason: "must not be empty",
            });
        }
        if periods.is_empty() {
            return Err(ValidationError::Parameter {
                parameter: "TOU periods",
                reason: "must not be empty",
            });
        }
        let mut request = self.request(CommandKind::TouSchedule);
        request.controller_serial_number = Some(controller_serial.to_owned());
        request.reservation_use = Some(if enabled { 1 } else { 2 });
        request.reservation = Some(ReservationPayload::Tou(periods));
        Ok(self.envelope(
            topic::tou_schedule(self.device),
            topic::client_response(self.device.device_type, self.client_id, "tou/rd"),
            request,
        ))
    }

    /// Select recirculation mode 1..=4.
    pub fn recirculation_mode(&self, mode: u8) -> Result<CommandEnvelope, ValidationError> {
        ValidationError::range_check("recirculation mode", f64::from(mode), 1.0, 4.0)?;
        Ok(self.control(
            CommandKind::RecirculationMode,
            "recirc-mode",
            vec![i64::from(mode)],
        ))
    }

    pub fn recirculation_hot_button(&self) -> CommandEnvelope {
        self.control(CommandKind::RecirculationHotButton, "recirc-hotbtn", vec![])
    }

    pub fn reservation_read(&self) -> CommandEnvelope {
        self.envelope(
            topic::reservation_read(self.device),
            topic::client_response(self.device.device_type, self.client_id, "rsv/rd"),
            self.request(CommandKind::ReservationRead),
        )
    }

    /// Replace the weekly reservation program.
    pub fn reservation_update(
        &self,
        enabled: bool,
        entries: Vec<ReservationEntry>,
    ) -> Result<CommandEnvelope, ValidationError> {
        if entries.is_empty() {
            return Err(ValidationError::Parameter {
                parameter: "reservation entries",
                reason: "must not be empty",
            });
        }
        let mut request = self.request(CommandKind::ReservationUpdate);
        request.reservation_use = Some(if enabled { 1 } else { 2 });
        request.reservation = Some(ReservationPayload::Program(entries));
        Ok(self.envelope(
            topic::reservation_update(self.device),
            topic::client_response(self.device.device_type, self.client_id, "rsv/rd"),
            request,
        ))
    }

    /// Query daily energy usage for the given months of `year`.
    pub fn energy_usage(
        &self,
        year: u16,
        months: Vec<u8>,
    ) -> Result<CommandEnvelope, ValidationError> {
        if months.is_empty() {
            return Err(ValidationError::Parameter {
                parameter: "months",
                reason: "must name at least one month",
            });
        }
        for month in &months {
            ValidationError::range_check("month", f64::from(*month), 1.0, 12.0)?;
        }
        let mut request = self.request(CommandKind::EnergyUsageQuery);
        request.year = Some(year);
        request.month = Some(months);
        Ok(self.envelope(
            topic::energy_usage_request(self.device),
            topic::client_response(
                self.device.device_type,
                self.client_id,
                "energy-usage-daily-query/rd",
            ),
            request,
        ))
    }
}

/// °F to the half-degree-Celsius steps the controller stores.
pub fn fahrenheit_to_half_celsius(fahrenheit: f64) -> i64 {
    ((fahrenheit - 32.0) * 5.0 / 9.0 * 2.0).round() as i64
}
