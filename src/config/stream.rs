use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Agent-facing stream tuning (Watch delivery and Keepalive liveness)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StreamConfig {
    /// Buffered messages per node delivery channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Maximum wait for room in a full delivery channel (unit: milliseconds)
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// Time a closed Watch stream has to reconnect before the node is marked
    /// Inactive (unit: milliseconds)
    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,

    /// Maximum wait for the identifying request on a fresh stream (unit: milliseconds)
    #[serde(default = "default_first_request_timeout_ms")]
    pub first_request_timeout_ms: u64,

    /// Interval between keepalive probes (unit: milliseconds)
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Maximum wait for a keepalive response (unit: milliseconds)
    #[serde(default = "default_keepalive_timeout_ms")]
    pub keepalive_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
            first_request_timeout_ms: default_first_request_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            keepalive_timeout_ms: default_keepalive_timeout_ms(),
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfig("stream.channel_capacity must be > 0".into()));
        }
        if self.keepalive_interval_ms == 0 || self.keepalive_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "stream keepalive interval and timeout must be > 0".into(),
            ));
        }
        if self.keepalive_timeout_ms >= self.keepalive_interval_ms {
            return Err(Error::InvalidConfig(format!(
                "stream.keepalive_timeout_ms {} must be shorter than keepalive_interval_ms {}",
                self.keepalive_timeout_ms, self.keepalive_interval_ms
            )));
        }
        if self.first_request_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "stream.first_request_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn first_request_timeout(&self) -> Duration {
        Duration::from_millis(self.first_request_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }
}

fn default_channel_capacity() -> usize {
    32
}
fn default_delivery_timeout_ms() -> u64 {
    2_000
}
fn default_disconnect_grace_ms() -> u64 {
    10_000
}
fn default_first_request_timeout_ms() -> u64 {
    10_000
}
fn default_keepalive_interval_ms() -> u64 {
    30_000
}
fn default_keepalive_timeout_ms() -> u64 {
    10_000
}
