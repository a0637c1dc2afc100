//! Session configuration.

use std::time::Duration;

use uuid::Uuid;

use crate::detect::WatchedFields;

/// Reconnection behavior after an interruption.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Ceiling for the exponential backoff.
    pub max_delay: Duration,
    /// Give up and go `Disconnected` after this many failed attempts.
    /// `None` retries until told to stop.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay before attempt `attempt` (1-based), with deterministic
    /// ±25% jitter so simultaneous clients fan out without shared state.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.initial_delay.as_secs_f64() * f64::from(2_u32.saturating_pow(exponent));
        let jitter = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
        let delay = (base * jitter).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(delay)
    }
}

/// Everything tunable about one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// MQTT-level client identity, also part of response topic shapes.
    pub client_id: String,
    /// Cloud session identity carried in every command envelope.
    pub session_id: String,
    /// Deadline for each submitted command, measured from submission.
    pub command_timeout: Duration,
    /// Most commands held while the connection is down; the oldest is
    /// evicted when a newer submission would exceed this.
    pub max_queued_commands: usize,
    /// Minimum spacing between consecutive publishes to one device.
    /// Zero disables pacing.
    pub command_gap: Duration,
    pub reconnect: ReconnectConfig,
    /// Fields whose movement is reported as `FieldChanged`.
    pub watched_fields: WatchedFields,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let instance = Uuid::new_v4().simple().to_string();
        Self {
            client_id: format!("tanklink-{}", &instance[..8]),
            session_id: Uuid::new_v4().to_string(),
            command_timeout: Duration::from_secs(10),
            max_queued_commands: 10,
            command_gap: Duration::ZERO,
            reconnect: ReconnectConfig::default(),
            watched_fields: WatchedFields::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_respects_ceiling() {
        let config = ReconnectConfig::default();
        let first = config.delay_for(1);
        let second = config.delay_for(2);
        let fifth = config.delay_for(5);
        let huge = config.delay_for(30);

        assert!(first >= Duration::from_millis(750));
        assert!(first <= Duration::from_millis(1250));
        assert!(second > first);
        assert!(fifth > second);
        assert!(huge <= Duration::from_secs(30));
    }

    #[test]
    fn jitter_is_deterministic_per_attempt() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for(3), config.delay_for(3));
    }

    #[test]
    fn default_client_id_is_unique_per_session() {
        let a = SessionConfig::default();
        let b = SessionConfig::default();
        assert_ne!(a.client_id, b.client_id);
        assert!(a.client_id.starts_with("tanklink-"));
    }
}
