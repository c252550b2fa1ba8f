//! Phased rollouts: the per-version state machine and the batcher that
//! turns agent changes into recomputes.

pub mod controller;
mod batcher;

pub use batcher::*;

#[cfg(test)]
mod batcher_test;
