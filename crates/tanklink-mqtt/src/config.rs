//! Broker connection settings.

use std::time::Duration;

/// Connection settings for the vendor's MQTT broker.
///
/// Credentials come from whichever discovery/auth flow the application uses;
/// this crate only needs the final username/password pair.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// MQTT client identifier; must match the session's `client_id` so the
    /// per-client response topics line up.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub use_tls: bool,
    /// Ask the broker to discard state between connections. The session
    /// engine resubscribes on resume either way.
    pub clean_session: bool,
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 8883,
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            use_tls: true,
            clean_session: true,
        }
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_tls_on_8883() {
        let config = MqttConfig::new("broker.example.com", "tanklink-1");
        assert_eq!(config.port, 8883);
        assert!(config.use_tls);
        assert!(config.clean_session);
        assert!(config.username.is_none());
    }

    #[test]
    fn credentials_builder_sets_both() {
        let config =
            MqttConfig::new("broker.example.com", "tanklink-1").credentials("user", "pass");
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.password.as_deref(), Some("pass"));
    }
}
