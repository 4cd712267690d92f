//! Configuration management for the mesh controller.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file named by `CONFIG_PATH`
//! - Environment variable overrides (`MESHSYNC__SECTION__FIELD`)
//! - Component-wise validation

mod monitoring;
mod queue;
mod store;
mod stream;
mod watcher;

pub use monitoring::*;
pub use queue::*;
pub use store::*;
pub use stream::*;
pub use watcher::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "MESHSYNC";

/// Main configuration container for the controller components
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ControllerConfig {
    /// Resource store access and conflict retry
    #[serde(default)]
    pub store: StoreConfig,
    /// Change watcher filtering
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Work queue rate limiting and worker pool
    #[serde(default)]
    pub queue: QueueConfig,
    /// Agent stream delivery and liveness
    #[serde(default)]
    pub stream: StreamConfig,
    /// Metrics exporter
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl ControllerConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers MUST call `validate()` once all overrides are applied.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }
        builder = builder.add_source(Self::environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional overrides from a file, then re-applies the
    /// environment so it keeps the highest priority.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.store.validate()?;
        self.watcher.validate()?;
        self.queue.validate()?;
        self.stream.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .ignore_empty(true)
            .try_parsing(true)
    }
}
