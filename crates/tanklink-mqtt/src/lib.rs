//! MQTT transport for the tanklink session engine, built on `rumqttc`.
//!
//! [`MqttTransport`] implements `tanklink_core::Transport`: it owns the
//! rumqttc event loop in a background task, forwards inbound publishes as
//! frames, and maps broker CONNACK/poll errors onto the session engine's
//! interrupted/resumed lifecycle.

mod config;
mod transport;

pub use config::MqttConfig;
pub use transport::MqttTransport;
