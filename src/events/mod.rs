//! Notifications produced by store mutations.

mod bus;
mod dependency;
mod updates;

#[cfg(test)]
mod bus_test;
#[cfg(test)]
mod dependency_test;
#[cfg(test)]
mod updates_test;

pub use bus::*;
pub use dependency::*;
pub use updates::*;
