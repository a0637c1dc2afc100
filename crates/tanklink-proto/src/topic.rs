//! MQTT topic construction.
//!
//! Command traffic lives under `cmd/{device_type}/navilink-{mac}/...` with
//! device responses delivered on a per-client `.../res` branch; unsolicited
//! telemetry broadcasts arrive under `evt/{device_type}/navilink-{mac}/...`.
//! Reservation, TOU and energy responses come back on suffixed response
//! branches keyed by client id alone, so a session subscribes to both shapes.

use crate::device::Device;

fn device_segment(device: &Device) -> String {
    format!("navilink-{}", device.mac_address)
}

/// Topic for plain control commands (power, mode, temperature, ...).
pub fn control(device: &Device) -> String {
    format!("cmd/{}/{}/ctrl", device.device_type, device_segment(device))
}

/// Topic that asks the device to publish a full status payload.
pub fn status_request(device: &Device) -> String {
    format!("cmd/{}/{}/st", device.device_type, device_segment(device))
}

/// Topic that asks the device to publish its feature/capability payload.
pub fn device_info_request(device: &Device) -> String {
    format!("cmd/{}/{}/st/did", device.device_type, device_segment(device))
}

/// Topic for writing the weekly reservation program.
pub fn reservation_update(device: &Device) -> String {
    format!(
        "cmd/{}/{}/ctrl/rsv/rd",
        device.device_type,
        device_segment(device)
    )
}

/// Topic that asks the device to publish its reservation program.
pub fn reservation_read(device: &Device) -> String {
    format!(
        "cmd/{}/{}/st/rsv/rd",
        device.device_type,
        device_segment(device)
    )
}

/// Topic for writing the time-of-use schedule.
pub fn tou_schedule(device: &Device) -> String {
    format!(
        "cmd/{}/{}/ctrl/tou/rd",
        device.device_type,
        device_segment(device)
    )
}

/// Topic that asks the device for daily energy-usage history.
pub fn energy_usage_request(device: &Device) -> String {
    format!(
        "cmd/{}/{}/st/energy-usage-daily-query/rd",
        device.device_type,
        device_segment(device)
    )
}

/// Response topic for plain commands addressed to this client.
pub fn response(device: &Device, client_id: &str) -> String {
    format!(
        "cmd/{}/{}/{client_id}/res",
        device.device_type,
        device_segment(device)
    )
}

/// Response topic for the suffixed branches (`rsv/rd`, `tou/rd`, ...), which
/// the cloud keys by client id without the device segment.
pub fn client_response(device_type: u16, client_id: &str, suffix: &str) -> String {
    format!("cmd/{device_type}/{client_id}/res/{suffix}")
}

/// Subscription filter covering the per-device response branch.
pub fn response_filter(device: &Device, client_id: &str) -> String {
    format!(
        "cmd/{}/{}/{client_id}/res/#",
        device.device_type,
        device_segment(device)
    )
}

/// Subscription filter covering the per-client suffixed response branches.
pub fn client_response_filter(device_type: u16, client_id: &str) -> String {
    format!("cmd/{device_type}/{client_id}/res/#")
}

/// Subscription filter covering unsolicited telemetry broadcasts.
pub fn event_filter(device: &Device) -> String {
    format!("evt/{}/{}/#", device.device_type, device_segment(device))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn device() -> Device {
        Device::new("04:78:63:aa:bb:cc")
    }

    #[test]
    fn topics_carry_device_type_and_mac() {
        let d = device();
        assert_eq!(control(&d), "cmd/52/navilink-047863aabbcc/ctrl");
        assert_eq!(status_request(&d), "cmd/52/navilink-047863aabbcc/st");
        assert_eq!(
            device_info_request(&d),
            "cmd/52/navilink-047863aabbcc/st/did"
        );
    }

    #[test]
    fn response_filter_covers_suffixed_branches() {
        let d = device();
        assert_eq!(
            response_filter(&d, "tanklink-1"),
            "cmd/52/navilink-047863aabbcc/tanklink-1/res/#"
        );
        assert_eq!(
            client_response_filter(d.device_type, "tanklink-1"),
            "cmd/52/tanklink-1/res/#"
        );
        assert_eq!(event_filter(&d), "evt/52/navilink-047863aabbcc/#");
    }
}
