use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Work queue rate limiting: the stricter of a per-item exponential backoff
/// and a global token bucket applies to every requeue.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueConfig {
    /// Number of reconcile workers draining the queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-item backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Per-item backoff cap (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Token bucket refill rate (tokens per second)
    #[serde(default = "default_qps")]
    pub qps: u64,

    /// Token bucket capacity
    #[serde(default = "default_burst")]
    pub burst: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            qps: default_qps(),
            burst: default_burst(),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("queue.workers must be > 0".into()));
        }
        if self.base_delay_ms == 0 {
            return Err(Error::InvalidConfig("queue.base_delay_ms must be > 0".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "queue.max_delay_ms {} must be >= base_delay_ms {}",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.qps == 0 || self.burst == 0 {
            return Err(Error::InvalidConfig("queue.qps and queue.burst must be > 0".into()));
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_workers() -> usize {
    2
}
fn default_base_delay_ms() -> u64 {
    5
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_qps() -> u64 {
    10
}
fn default_burst() -> u64 {
    100
}
