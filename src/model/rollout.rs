use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RolloutStatus {
    #[default]
    Pending,
    Started,
    Paused,
    Error,
    Stable,
    Replaced,
}

impl RolloutStatus {
    /// Started, paused and errored rollouts still own their agents.
    pub fn is_active(&self) -> bool {
        matches!(self, RolloutStatus::Started | RolloutStatus::Paused | RolloutStatus::Error)
    }

    /// Terminal for the version that reached it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RolloutStatus::Stable | RolloutStatus::Replaced)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutStatus::Pending => "pending",
            RolloutStatus::Started => "started",
            RolloutStatus::Paused => "paused",
            RolloutStatus::Error => "error",
            RolloutStatus::Stable => "stable",
            RolloutStatus::Replaced => "replaced",
        }
    }
}

impl fmt::Display for RolloutStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase sizing and error budget for a rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutOptions {
    /// Agents moved to pending in the first phase
    pub initial: u64,
    /// Growth factor applied to the previous phase size
    pub multiplier: f64,
    /// Upper bound on agents moved per phase
    pub maximum: u64,
    /// Errored agents tolerated before the rollout stops
    pub max_errors: u64,
    pub start_automatically: bool,
    pub rollback_on_failure: bool,
}

impl RolloutOptions {
    /// Phases must move at least one agent and never shrink.
    pub fn validate(&self) -> Result<()> {
        if self.initial == 0 {
            return Err(Error::invalid("rollout initial must be at least 1"));
        }
        if self.maximum == 0 {
            return Err(Error::invalid("rollout maximum must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::invalid("rollout multiplier must be a number >= 1"));
        }
        Ok(())
    }
}

impl Default for RolloutOptions {
    fn default() -> Self {
        Self {
            initial: 3,
            multiplier: 5.0,
            maximum: 100,
            max_errors: 0,
            start_automatically: false,
            rollback_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutProgress {
    pub completed: u64,
    pub errors: u64,
    pub pending: u64,
    pub waiting: u64,
}

impl RolloutProgress {
    pub fn total(&self) -> u64 {
        self.completed + self.errors + self.pending + self.waiting
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    pub status: RolloutStatus,
    pub phase: u64,
    pub options: RolloutOptions,
    pub progress: RolloutProgress,
}

impl Rollout {
    pub fn new(options: RolloutOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }
}
