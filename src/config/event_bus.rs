use serde::Deserialize;
use serde::Serialize;

use super::invalid_config;
use crate::Result;

/// Update notification delivery
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EventBusConfig {
    /// Per-subscriber buffer; deliveries beyond it are dropped
    #[serde(default = "default_subscriber_buffer_size")]
    pub subscriber_buffer_size: usize,

    /// Longest a merged subscription holds an event
    #[serde(default = "default_max_merge_latency_ms")]
    pub max_merge_latency_ms: u64,

    #[serde(default = "default_max_events_to_merge")]
    pub max_events_to_merge: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer_size: default_subscriber_buffer_size(),
            max_merge_latency_ms: default_max_merge_latency_ms(),
            max_events_to_merge: default_max_events_to_merge(),
        }
    }
}

impl EventBusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.subscriber_buffer_size == 0 {
            return Err(invalid_config("event_bus.subscriber_buffer_size must be > 0"));
        }
        if self.max_events_to_merge == 0 {
            return Err(invalid_config("event_bus.max_events_to_merge must be > 0"));
        }
        Ok(())
    }
}

fn default_subscriber_buffer_size() -> usize {
    1024
}
fn default_max_merge_latency_ms() -> u64 {
    100
}
fn default_max_events_to_merge() -> usize {
    100
}
