use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatcherConfig {
    /// Add events for objects created longer ago than this are treated as
    /// startup resync echoes and dropped (unit: seconds)
    #[serde(default = "default_stale_add_threshold_secs")]
    pub stale_add_threshold_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            stale_add_threshold_secs: default_stale_add_threshold_secs(),
        }
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stale_add_threshold_secs == 0 {
            return Err(Error::InvalidConfig(
                "watcher.stale_add_threshold_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn stale_add_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_add_threshold_secs)
    }
}

fn default_stale_add_threshold_secs() -> u64 {
    300
}
