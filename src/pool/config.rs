use serde_aux::field_attributes::deserialize_number_from_string;
use std::time::Duration;

/// Sizing and waiting policy of a [`ConnectionPool`](super::ConnectionPool).
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections handed out at the same time.
    #[serde(
        default = "default_max_size",
        deserialize_with = "deserialize_number_from_string"
    )]
    pub max_size: usize,
    /// How long [`get_connection`](super::ConnectionPoolExt::get_connection) waits for a free
    /// slot, in milliseconds. `None` waits forever, `0` fails straight away.
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
    /// Available connections idle for longer than this are closed on the next acquire.
    #[serde(default)]
    pub max_idle_time_seconds: Option<u64>,
}

fn default_max_size() -> usize {
    10
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            wait_timeout_ms: None,
            max_idle_time_seconds: None,
        }
    }
}

impl PoolConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn max_idle_time(&self) -> Option<Duration> {
        self.max_idle_time_seconds.map(Duration::from_secs)
    }
}
