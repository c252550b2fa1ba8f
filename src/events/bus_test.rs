use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use super::*;
use crate::Component;
use crate::EventBusConfig;
use crate::Kind;
use crate::Resource;

fn bus(buffer: usize) -> EventBus<EventUpdates> {
    EventBus::new(&EventBusConfig {
        subscriber_buffer_size: buffer,
        ..Default::default()
    })
}

fn batch(
    name: &str,
    event_type: EventType,
) -> EventUpdates {
    let mut updates = EventUpdates::new();
    updates.include_resource(Resource::Source(Component::new(name, "macos")), event_type);
    updates
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn publish_should_reach_every_subscriber() {
    let bus = bus(8);
    let token = CancellationToken::new();
    let mut first = bus.subscribe(&token);
    let mut second = bus.subscribe(&token);

    assert_eq!(bus.publish(batch("s1", EventType::Insert)), 2);

    assert!(first.recv().await.unwrap().contains_resource(Kind::Source, "s1"));
    assert!(second.recv().await.unwrap().contains_resource(Kind::Source, "s1"));
}

#[tokio::test]
#[traced_test]
async fn publish_should_drop_when_buffer_full() {
    let bus = bus(1);
    let token = CancellationToken::new();
    let mut subscription = bus.subscribe(&token);

    assert_eq!(bus.publish(batch("s1", EventType::Insert)), 1);
    assert_eq!(bus.publish(batch("s2", EventType::Insert)), 0);

    assert!(subscription.recv().await.unwrap().contains_resource(Kind::Source, "s1"));
    assert!(subscription.try_recv().is_none());
    assert!(logs_contain("subscriber buffer full"));
}

#[tokio::test]
async fn cancelling_token_should_unsubscribe() {
    let bus = bus(8);
    let token = CancellationToken::new();
    let _subscription = bus.subscribe(&token);
    assert_eq!(bus.subscriber_count(), 1);

    token.cancel();
    settle().await;

    assert_eq!(bus.subscriber_count(), 0);
    assert_eq!(bus.publish(batch("s1", EventType::Insert)), 0);
}

#[tokio::test]
async fn dropping_subscription_should_unsubscribe() {
    let bus = bus(8);
    let token = CancellationToken::new();
    let subscription = bus.subscribe(&token);
    assert_eq!(bus.subscriber_count(), 1);

    drop(subscription);
    settle().await;

    assert_eq!(bus.subscriber_count(), 0);
    assert!(!token.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn merged_subscription_should_combine_within_latency() {
    let bus = bus(8);
    let token = CancellationToken::new();
    let mut subscription = bus.subscribe_merged(
        &token,
        MergeOptions {
            max_latency: Duration::from_millis(50),
            max_events: 10,
        },
    );

    bus.publish(batch("s1", EventType::Insert));
    bus.publish(batch("s2", EventType::Insert));
    settle().await;
    assert!(subscription.try_recv().is_none());

    tokio::time::advance(Duration::from_millis(60)).await;
    let merged = subscription.recv().await.unwrap();
    assert_eq!(merged.size(), 2);
}

#[tokio::test(start_paused = true)]
async fn merged_subscription_should_flush_on_conflict_in_order() {
    let bus = bus(8);
    let token = CancellationToken::new();
    let mut subscription = bus.subscribe_merged(
        &token,
        MergeOptions {
            max_latency: Duration::from_millis(50),
            max_events: 10,
        },
    );

    bus.publish(batch("s1", EventType::Insert));
    bus.publish(batch("s1", EventType::Remove));
    settle().await;

    let first = subscription.recv().await.unwrap();
    assert!(first.contains_resource_event(Kind::Source, "s1", EventType::Insert));

    tokio::time::advance(Duration::from_millis(60)).await;
    let second = subscription.recv().await.unwrap();
    assert!(second.contains_resource_event(Kind::Source, "s1", EventType::Remove));
}

#[tokio::test(start_paused = true)]
async fn merged_subscription_should_flush_at_max_events() {
    let bus = bus(8);
    let token = CancellationToken::new();
    let mut subscription = bus.subscribe_merged(
        &token,
        MergeOptions {
            max_latency: Duration::from_secs(60),
            max_events: 2,
        },
    );

    bus.publish(batch("s1", EventType::Insert));
    bus.publish(batch("s2", EventType::Insert));
    settle().await;

    let merged = subscription.recv().await.unwrap();
    assert_eq!(merged.size(), 2);
}
