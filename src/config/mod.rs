//! Configuration management for the control plane.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file named by `CONFIG_PATH`
//! - Environment variable overrides (`FLEET__SECTION__KEY`)
//! - Section-wise validation
mod event_bus;
mod logging;
mod rollout;
mod storage;
pub use event_bus::*;
pub use logging::*;
pub use rollout::*;
pub use storage::*;
#[cfg(test)]
mod config_test;

use std::env;
use std::fmt::Debug;
use std::path::Path;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

const ENV_PREFIX: &str = "FLEET";

/// Root configuration container.
///
/// Merging order (later sources override earlier):
/// 1. Type defaults
/// 2. Configuration file from `CONFIG_PATH` (if set)
/// 3. Environment variables with `FLEET__` prefix
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct FleetConfig {
    /// Embedded database location and tuning
    #[serde(default)]
    pub storage: StorageConfig,
    /// Rollout batching and default rollout options
    #[serde(default)]
    pub rollout: RolloutConfig,
    /// Update notification delivery
    #[serde(default)]
    pub event_bus: EventBusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Debug for FleetConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FleetConfig")
            .field("storage", &self.storage)
            .field("rollout", &self.rollout)
            .finish()
    }
}

impl FleetConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Validation is deferred so callers can layer more files with
    /// `with_override_config()`; call `validate()` before use.
    ///
    /// # Examples
    /// ```ignore
    /// let cfg = FleetConfig::new()?.validate()?;
    ///
    /// std::env::set_var("FLEET__ROLLOUT__BATCH_INTERVAL_MS", "50");
    /// let cfg = FleetConfig::new()?
    ///     .with_override_config("fleet.toml")?
    ///     .validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Layers `path` over the current values, then the environment again.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Consumes self and validates every section.
    pub fn validate(self) -> Result<Self> {
        self.storage.validate()?;
        self.rollout.validate()?;
        self.event_bus.validate()?;
        self.logging.validate()?;
        Ok(self)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

/// Ensures `path` is a directory, creating it when missing.
pub(crate) fn validate_directory(
    path: &Path,
    name: &str,
) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::Config(ConfigError::Message(format!(
            "{name} path cannot be empty"
        ))));
    }

    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| {
            Error::Config(ConfigError::Message(format!(
                "failed to create {name} directory {}: {e}",
                path.display()
            )))
        })?;
    } else if !path.is_dir() {
        return Err(Error::Config(ConfigError::Message(format!(
            "{name} path {} is not a directory",
            path.display()
        ))));
    }

    Ok(())
}

pub(crate) fn invalid_config(message: impl Into<String>) -> Error {
    Error::Config(ConfigError::Message(message.into()))
}
