//! Fixtures shared by the unit tests: temporary stores and small resource
//! graphs.
mod fixtures;
mod store;

pub(crate) use fixtures::*;
pub(crate) use store::*;
