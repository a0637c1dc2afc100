//! Field catalog and value decoding.
//!
//! Device payloads are flat JSON objects of raw integers. Each field the
//! client cares about is declared once in a static catalog entry naming its
//! wire key and the conversion that turns the raw value into engineering
//! units. Fields absent from a payload are simply absent from the decoded
//! map; unknown wire keys are ignored.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Stable identifier of a decoded field, used as the key in snapshots and
/// change events.
pub type FieldId = &'static str;

/// Temperature unit the device is currently configured to report in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            1 => Some(Self::Celsius),
            2 => Some(Self::Fahrenheit),
            _ => None,
        }
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Bool(bool),
    /// A coded enumeration: human label plus the raw wire value.
    Enum(&'static str, i64),
    /// Present on the wire but carrying the device's "no value" marker.
    NotApplicable,
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// How a raw wire integer becomes a [`FieldValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Numeric value taken as-is.
    Raw,
    /// Tenths: divide by 10.
    Div10,
    /// Half-degrees Celsius, converted to the session's display unit.
    HalfDegrees,
    /// Tenth-degrees Celsius, converted to the session's display unit.
    DeciDegrees,
    /// Device boolean encoding: 2 is true, 0 and 1 are false.
    DeviceBool,
    /// Conventional boolean encoding: nonzero is true.
    PlainBool,
    /// Current operating mode (standby / heat pump / hybrid efficiency or boost).
    OperationMode,
    /// Configured DHW operation setting (the user-selected mode).
    DhwSetting,
    /// Temperature unit selector, also consulted as decode context.
    UnitSelector,
}

/// Per-payload context consulted by unit-dependent conversions.
///
/// Built from the payload itself before field decoding, so a payload that
/// carries its own unit selector is decoded consistently with it.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext {
    pub unit: TemperatureUnit,
}

impl Default for DecodeContext {
    fn default() -> Self {
        // The cloud provisions US units unless the panel says otherwise.
        Self {
            unit: TemperatureUnit::Fahrenheit,
        }
    }
}

impl DecodeContext {
    pub fn from_payload(body: &serde_json::Map<String, Value>) -> Self {
        let unit = body
            .get("temperatureType")
            .and_then(Value::as_i64)
            .and_then(TemperatureUnit::from_raw)
            .unwrap_or(TemperatureUnit::Fahrenheit);
        Self { unit }
    }

    fn celsius_out(self, celsius: f64) -> f64 {
        match self.unit {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }
}

impl Conversion {
    /// Decode one raw JSON value. `None` when the raw value is not numeric.
    fn apply(self, raw: &Value, ctx: DecodeContext) -> Option<FieldValue> {
        if raw.is_null() {
            return Some(FieldValue::NotApplicable);
        }
        let n = raw.as_f64()?;
        let decoded = match self {
            Self::Raw => FieldValue::Number(n),
            Self::Div10 => FieldValue::Number(n / 10.0),
            Self::HalfDegrees => FieldValue::Number(round1(ctx.celsius_out(n / 2.0))),
            Self::DeciDegrees => FieldValue::Number(round1(ctx.celsius_out(n / 10.0))),
            Self::DeviceBool => FieldValue::Bool(n as i64 == 2),
            Self::PlainBool => FieldValue::Bool(n as i64 != 0),
            Self::OperationMode => match n as i64 {
                0 => FieldValue::Enum("standby", 0),
                32 => FieldValue::Enum("heat-pump", 32),
                64 => FieldValue::Enum("hybrid-efficiency", 64),
                96 => FieldValue::Enum("hybrid-boost", 96),
                other => FieldValue::Enum("unknown", other),
            },
            Self::DhwSetting => match n as i64 {
                1 => FieldValue::Enum("heat-pump", 1),
                2 => FieldValue::Enum("electric", 2),
                3 => FieldValue::Enum("energy-saver", 3),
                4 => FieldValue::Enum("high-demand", 4),
                5 => FieldValue::Enum("vacation", 5),
                6 => FieldValue::Enum("power-off", 6),
                other => FieldValue::Enum("unknown", other),
            },
            Self::UnitSelector => match TemperatureUnit::from_raw(n as i64) {
                Some(TemperatureUnit::Celsius) => FieldValue::Enum("celsius", 1),
                Some(TemperatureUnit::Fahrenheit) => FieldValue::Enum("fahrenheit", 2),
                None => FieldValue::Enum("unknown", n as i64),
            },
        };
        Some(decoded)
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// One catalog entry: decoded field id, wire key, conversion.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub id: FieldId,
    pub key: &'static str,
    pub conversion: Conversion,
}

const fn spec(id: FieldId, key: &'static str, conversion: Conversion) -> FieldSpec {
    FieldSpec {
        id,
        key,
        conversion,
    }
}

/// Fields decoded from a status payload.
pub static STATUS_FIELDS: &[FieldSpec] = &[
    spec("dhw_temperature", "dhwTemperature", Conversion::HalfDegrees),
    spec(
        "dhw_temperature_setting",
        "dhwTemperatureSetting",
        Conversion::HalfDegrees,
    ),
    spec(
        "tank_upper_temperature",
        "tankUpperTemperature",
        Conversion::DeciDegrees,
    ),
    spec(
        "tank_lower_temperature",
        "tankLowerTemperature",
        Conversion::DeciDegrees,
    ),
    spec(
        "ambient_temperature",
        "ambientTemperature",
        Conversion::DeciDegrees,
    ),
    spec(
        "inlet_temperature",
        "currentInletTemperature",
        Conversion::Div10,
    ),
    spec("dhw_flow_rate", "currentDhwFlowRate", Conversion::Div10),
    spec("instant_power", "currentInstPower", Conversion::Raw),
    spec("dhw_charge_percent", "dhwChargePer", Conversion::Raw),
    spec("error_code", "errorCode", Conversion::Raw),
    spec("sub_error_code", "subErrorCode", Conversion::Raw),
    spec("wifi_rssi", "wifiRssi", Conversion::Raw),
    spec("operation_mode", "operationMode", Conversion::OperationMode),
    spec(
        "dhw_operation_setting",
        "dhwOperationSetting",
        Conversion::DhwSetting,
    ),
    spec("temperature_unit", "temperatureType", Conversion::UnitSelector),
    spec("compressor_running", "compUse", Conversion::DeviceBool),
    spec("upper_element_running", "heatUpperUse", Conversion::DeviceBool),
    spec("lower_element_running", "heatLowerUse", Conversion::DeviceBool),
    spec("evaporator_fan_running", "evaFanUse", Conversion::DeviceBool),
    spec("dhw_enabled", "dhwUse", Conversion::DeviceBool),
    spec("operation_busy", "operationBusy", Conversion::DeviceBool),
    spec(
        "freeze_protection_active",
        "freezeProtectionUse",
        Conversion::DeviceBool,
    ),
    spec(
        "anti_legionella_enabled",
        "antiLegionellaUse",
        Conversion::DeviceBool,
    ),
    spec(
        "anti_legionella_running",
        "antiLegionellaOperationBusy",
        Conversion::DeviceBool,
    ),
    spec(
        "anti_legionella_period_days",
        "antiLegionellaPeriod",
        Conversion::Raw,
    ),
    spec("eco_enabled", "ecoUse", Conversion::DeviceBool),
    spec(
        "reservation_enabled",
        "programReservationUse",
        Conversion::DeviceBool,
    ),
    spec("vacation_days_setting", "vacationDaySetting", Conversion::Raw),
    spec("vacation_days_elapsed", "vacationDayElapsed", Conversion::Raw),
    spec("tou_status", "touStatus", Conversion::Raw),
    spec("dr_event_status", "drEventStatus", Conversion::Raw),
    spec(
        "recirculation_mode",
        "recircOperationMode",
        Conversion::Raw,
    ),
    spec(
        "air_filter_alarm_enabled",
        "airFilterAlarmUse",
        Conversion::DeviceBool,
    ),
    spec(
        "air_filter_alarm_elapsed_days",
        "airFilterAlarmPeriod",
        Conversion::Raw,
    ),
    spec("current_fan_rpm", "currentFanRpm", Conversion::Raw),
    spec("target_fan_rpm", "targetFanRpm", Conversion::Raw),
];

/// Fields decoded from a device-info (feature/capability) payload.
pub static FEATURE_FIELDS: &[FieldSpec] = &[
    spec("country_code", "countryCode", Conversion::Raw),
    spec("model_type_code", "modelTypeCode", Conversion::Raw),
    spec("volume_code", "volumeCode", Conversion::Raw),
    spec(
        "controller_sw_version",
        "controllerSwVersion",
        Conversion::Raw,
    ),
    spec("panel_sw_version", "panelSwVersion", Conversion::Raw),
    spec("wifi_sw_version", "wifiSwVersion", Conversion::Raw),
    spec("temperature_unit", "temperatureType", Conversion::UnitSelector),
    spec(
        "dhw_temperature_min",
        "dhwTemperatureSettingMin",
        Conversion::HalfDegrees,
    ),
    spec(
        "dhw_temperature_max",
        "dhwTemperatureSettingMax",
        Conversion::HalfDegrees,
    ),
    spec("power_capable", "powerUse", Conversion::DeviceBool),
    spec("vacation_capable", "holidayUse", Conversion::DeviceBool),
    spec(
        "reservation_capable",
        "programReservationUse",
        Conversion::DeviceBool,
    ),
    spec("dhw_capable", "dhwUse", Conversion::DeviceBool),
    spec(
        "temperature_setting_capable",
        "dhwTemperatureSettingUse",
        Conversion::DeviceBool,
    ),
    spec(
        "smart_diagnostic_capable",
        "smartDiagnosticUse",
        Conversion::DeviceBool,
    ),
    spec("energy_usage_capable", "energyUsageUse", Conversion::DeviceBool),
    spec(
        "freeze_protection_capable",
        "freezeProtectionUse",
        Conversion::DeviceBool,
    ),
    spec(
        "demand_response_capable",
        "drSettingUse",
        Conversion::DeviceBool,
    ),
    spec(
        "anti_legionella_capable",
        "antiLegionellaSettingUse",
        Conversion::DeviceBool,
    ),
    spec(
        "recirculation_capable",
        "recirculationUse",
        Conversion::DeviceBool,
    ),
];

/// Decode every cataloged field present in `body`.
///
/// The unit selector is read from the payload first so temperature fields in
/// the same payload are interpreted consistently with it.
pub fn decode_fields(
    specs: &[FieldSpec],
    body: &serde_json::Map<String, Value>,
) -> BTreeMap<FieldId, FieldValue> {
    let ctx = DecodeContext::from_payload(body);
    specs
        .iter()
        .filter_map(|s| {
            body.get(s.key)
                .and_then(|raw| s.conversion.apply(raw, ctx))
                .map(|v| (s.id, v))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn body(v: serde_json::Value) -> serde_json::Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn half_degree_temperatures_follow_unit_selector() {
        let fahrenheit = body(json!({"temperatureType": 2, "dhwTemperature": 104}));
        let decoded = decode_fields(STATUS_FIELDS, &fahrenheit);
        assert_eq!(
            decoded.get("dhw_temperature"),
            Some(&FieldValue::Number(125.6))
        );

        let celsius = body(json!({"temperatureType": 1, "dhwTemperature": 104}));
        let decoded = decode_fields(STATUS_FIELDS, &celsius);
        assert_eq!(
            decoded.get("dhw_temperature"),
            Some(&FieldValue::Number(52.0))
        );
    }

    #[test]
    fn device_bool_treats_only_two_as_true() {
        for (raw, expected) in [(0, false), (1, false), (2, true)] {
            let decoded = decode_fields(STATUS_FIELDS, &body(json!({"compUse": raw})));
            assert_eq!(
                decoded.get("compressor_running"),
                Some(&FieldValue::Bool(expected)),
                "raw {raw}"
            );
        }
    }

    #[test]
    fn absent_fields_stay_absent_and_null_decodes_not_applicable() {
        let decoded = decode_fields(
            STATUS_FIELDS,
            &body(json!({"errorCode": 0, "wifiRssi": null})),
        );
        assert_eq!(decoded.get("error_code"), Some(&FieldValue::Number(0.0)));
        assert_eq!(decoded.get("wifi_rssi"), Some(&FieldValue::NotApplicable));
        assert_eq!(decoded.get("dhw_temperature"), None);
    }

    #[test]
    fn operation_mode_maps_known_codes() {
        let decoded = decode_fields(STATUS_FIELDS, &body(json!({"operationMode": 96})));
        assert_eq!(
            decoded.get("operation_mode"),
            Some(&FieldValue::Enum("hybrid-boost", 96))
        );
        let decoded = decode_fields(STATUS_FIELDS, &body(json!({"operationMode": 64})));
        assert_eq!(
            decoded.get("operation_mode"),
            Some(&FieldValue::Enum("hybrid-efficiency", 64))
        );
    }

    #[test]
    fn tenths_scaling_applies_to_flow_and_inlet() {
        let decoded = decode_fields(
            STATUS_FIELDS,
            &body(json!({"currentDhwFlowRate": 25, "currentInletTemperature": 681})),
        );
        assert_eq!(decoded.get("dhw_flow_rate"), Some(&FieldValue::Number(2.5)));
        assert_eq!(
            decoded.get("inlet_temperature"),
            Some(&FieldValue::Number(68.1))
        );
    }
}
