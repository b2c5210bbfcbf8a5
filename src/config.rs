use serde::Deserialize;
use std::time::Duration;

/// Renewal must start at least this long before a lease expires.
pub const MIN_RENEW_MARGIN_SECS: u64 = 5 * 60;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Period of the connection health check while a session is active.
    pub health_check_interval_secs: u64,
    /// Delay between a remote publish and our subscribe attempt.
    pub subscribe_debounce_ms: u64,
    /// How long before expiry a lease is renewed. Values below
    /// [`MIN_RENEW_MARGIN_SECS`] are raised to it.
    pub renew_margin_secs: u64,
    /// Buffer size of the session event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 10,
            subscribe_debounce_ms: 300,
            renew_margin_secs: MIN_RENEW_MARGIN_SECS,
            event_channel_capacity: 100,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn health_check_interval(&self) -> Duration {
        // tokio intervals panic on a zero period
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn subscribe_debounce(&self) -> Duration {
        Duration::from_millis(self.subscribe_debounce_ms)
    }

    pub fn renew_margin(&self) -> chrono::Duration {
        let secs = self.renew_margin_secs.max(MIN_RENEW_MARGIN_SECS);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn event_channel_capacity(&self) -> usize {
        self.event_channel_capacity.max(1)
    }
}
