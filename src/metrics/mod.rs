//! Prometheus counters for the store, the rollout machinery and the event bus.
//!
//! Counters are registered into [`REGISTRY`] once; [`render`] returns the
//! text exposition for whatever transport the embedding process uses.

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use std::sync::Once;
use tracing::error;

#[cfg(test)]
mod metrics_test;

lazy_static! {
    pub static ref RESOURCES_APPLIED: IntCounterVec = IntCounterVec::new(
        Opts::new("resources_applied", "Resources applied or deleted, by kind and outcome"),
        &["kind", "status"]
    )
    .expect("metric can not be created");

    pub static ref ROLLOUT_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("rollout_transitions", "Rollout status transitions, by target status"),
        &["status"]
    )
    .expect("metric can not be created");

    pub static ref BATCHER_FLUSHES: IntCounter =
        IntCounter::new("rollout_batcher_flushes", "Batcher ticks that recomputed at least one rollout")
            .expect("metric can not be created");

    pub static ref BATCHER_RECOMPUTE_FAILURES: IntCounter = IntCounter::new(
        "rollout_batcher_recompute_failures",
        "Rollout recomputes that failed inside the batcher"
    )
    .expect("metric can not be created");

    pub static ref EVENT_BUS_DROPPED_EVENTS: IntCounter = IntCounter::new(
        "event_bus_dropped_events",
        "Deliveries dropped because a subscriber buffer was full"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub(crate) fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(RESOURCES_APPLIED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ROLLOUT_TRANSITIONS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(BATCHER_FLUSHES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(BATCHER_RECOMPUTE_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(EVENT_BUS_DROPPED_EVENTS.clone()))
        .expect("collector can be registered");
}

/// Registers the counters into [`REGISTRY`]; later calls are no-ops.
pub fn register() {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));
}

/// Prometheus text exposition of every registered counter.
pub fn render() -> String {
    register();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("metrics could not be from_utf8'd: {}", e);
        String::new()
    })
}
