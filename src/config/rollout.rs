use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid_config;
use crate::Result;
use crate::RolloutOptions;

/// Rollout batching and the options new configurations start with
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RolloutConfig {
    /// How often queued configuration names are recomputed
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// Bound on queued batch requests before `batch` waits
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Deadline for the batcher worker to stop
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Periodic recompute of every rollout in progress; 0 disables it
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    #[serde(default = "default_initial")]
    pub initial: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_maximum")]
    pub maximum: u64,
    #[serde(default)]
    pub max_errors: u64,
    #[serde(default)]
    pub start_automatically: bool,
    #[serde(default)]
    pub rollback_on_failure: bool,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: default_batch_interval_ms(),
            queue_capacity: default_queue_capacity(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            initial: default_initial(),
            multiplier: default_multiplier(),
            maximum: default_maximum(),
            max_errors: 0,
            start_automatically: false,
            rollback_on_failure: false,
        }
    }
}

impl RolloutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_interval_ms == 0 {
            return Err(invalid_config("rollout.batch_interval_ms must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid_config("rollout.queue_capacity must be > 0"));
        }
        self.default_options()
            .validate()
            .map_err(|e| invalid_config(format!("rollout: {e}")))
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// None when the sweep is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }

    pub fn default_options(&self) -> RolloutOptions {
        RolloutOptions {
            initial: self.initial,
            multiplier: self.multiplier,
            maximum: self.maximum,
            max_errors: self.max_errors,
            start_automatically: self.start_automatically,
            rollback_on_failure: self.rollback_on_failure,
        }
    }
}

fn default_batch_interval_ms() -> u64 {
    100
}
fn default_queue_capacity() -> usize {
    100
}
fn default_shutdown_timeout_ms() -> u64 {
    5000
}
fn default_sweep_interval_ms() -> u64 {
    30_000
}
fn default_initial() -> u64 {
    3
}
fn default_multiplier() -> f64 {
    5.0
}
fn default_maximum() -> u64 {
    100
}
