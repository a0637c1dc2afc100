//! Device identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Device type code the cloud assigns to the NWP500 heat-pump water heater.
pub const NWP500_DEVICE_TYPE: u16 = 52;

/// Normalized MAC address, the stable identity of one physical unit.
///
/// Stored lowercase without separators so string comparison is identity
/// comparison regardless of how the caller obtained it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct MacAddress(String);

impl MacAddress {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw: String = raw.into();
        Self(
            raw.chars()
                .filter(|c| *c != ':' && *c != '-')
                .map(|c| c.to_ascii_lowercase())
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MacAddress {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// One cloud-registered device, as the vendor's device listing reports it.
///
/// Only what the MQTT dialect needs is kept; account and location metadata
/// stay with whichever client performed discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub mac_address: MacAddress,
    #[serde(default = "default_device_type")]
    pub device_type: u16,
    /// Opaque cloud routing value echoed back in every command.
    #[serde(default)]
    pub additional_value: String,
    #[serde(default)]
    pub device_name: String,
}

fn default_device_type() -> u16 {
    NWP500_DEVICE_TYPE
}

impl Device {
    pub fn new(mac_address: impl Into<MacAddress>) -> Self {
        Self {
            mac_address: mac_address.into(),
            device_type: NWP500_DEVICE_TYPE,
            additional_value: String::new(),
            device_name: String::new(),
        }
    }
}

impl From<String> for MacAddress {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn mac_address_normalizes_separators_and_case() {
        let a = MacAddress::new("04:78:63:AA:BB:CC");
        let b = MacAddress::new("047863aabbcc");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "047863aabbcc");
    }

    #[test]
    fn device_deserializes_with_defaults() {
        let device: Device = serde_json::from_str(r#"{"macAddress":"047863AABBCC"}"#).unwrap();
        assert_eq!(device.device_type, NWP500_DEVICE_TYPE);
        assert_eq!(device.mac_address.as_str(), "047863aabbcc");
        assert!(device.additional_value.is_empty());
    }
}
