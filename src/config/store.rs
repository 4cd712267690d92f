use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Namespace holding the controller's resources
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Maximum read-mutate-write attempts on optimistic concurrency conflicts
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: usize,

    /// First backoff between conflicting attempts (unit: milliseconds), doubled each time
    #[serde(default = "default_conflict_backoff_ms")]
    pub conflict_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            conflict_retries: default_conflict_retries(),
            conflict_backoff_ms: default_conflict_backoff_ms(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::InvalidConfig("store.namespace cannot be empty".into()));
        }
        if self.conflict_retries == 0 {
            return Err(Error::InvalidConfig(
                "store.conflict_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn conflict_backoff(&self) -> Duration {
        Duration::from_millis(self.conflict_backoff_ms)
    }
}

fn default_namespace() -> String {
    "default".to_string()
}
fn default_conflict_retries() -> usize {
    5
}
fn default_conflict_backoff_ms() -> u64 {
    10
}
