//! In-memory indexes maintained by the store under its writer lock.

mod agent_index;
mod configuration_index;

#[cfg(test)]
mod agent_index_test;

pub use agent_index::*;
pub use configuration_index::*;
