//! Resource, agent and rollout data model.

mod agent;
mod configuration;
mod kind;
mod metadata;
mod parameter;
mod resource;
mod rollout;
mod status;


pub use agent::*;
pub use configuration::*;
pub use kind::*;
pub use metadata::*;
pub use parameter::*;
pub use resource::*;
pub use rollout::*;
pub use status::*;
