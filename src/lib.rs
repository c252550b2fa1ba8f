//! Control plane core for a fleet of telemetry agents.
//!
//! - [`SledStore`]: versioned resource store with archive history, agent
//!   records and in-memory indexes, backed by sled.
//! - [`EventBus`] / [`EventUpdates`]: update batches published after every
//!   mutation, expanded with transitive dependents.
//! - [`rollout`]: the phased rollout state machine and the
//!   [`RolloutBatcher`] coalescing agent changes into recomputes.
//! - [`ControlPlane`]: wires the pieces together for an embedding process.

mod config;
mod constants;
mod control_plane;
mod errors;
mod events;
mod index;
pub mod metrics;
mod model;
pub mod rollout;
mod storage;
mod utils;

pub use config::*;
pub use constants::FIELD_CONFIGURATION_CURRENT;
pub use constants::FIELD_CONFIGURATION_FUTURE;
pub use constants::FIELD_CONFIGURATION_PENDING;
pub use constants::FIELD_ROLLOUT_COMPLETE;
pub use constants::FIELD_ROLLOUT_ERROR;
pub use constants::FIELD_ROLLOUT_PENDING;
pub use constants::FIELD_ROLLOUT_WAITING;
pub use constants::SENSITIVE_PLACEHOLDER;
pub use control_plane::*;
pub use errors::*;
pub use events::*;
pub use index::*;
pub use model::*;
pub use rollout::RolloutBatcher;
pub use storage::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
