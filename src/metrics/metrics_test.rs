use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("fleet".to_string()), None).unwrap();
    register_custom_metrics(&registry);
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    RESOURCES_APPLIED.with_label_values(&["Source", "created"]).inc();
    let metrics = registry.gather();
    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();

    assert!(
        metric_names.contains(&"fleet_resources_applied"),
        "Missing fleet_resources_applied"
    );
}

#[test]
fn test_counter_increment() {
    ROLLOUT_TRANSITIONS.with_label_values(&["paused-test"]).reset();

    ROLLOUT_TRANSITIONS.with_label_values(&["paused-test"]).inc();
    ROLLOUT_TRANSITIONS.with_label_values(&["paused-test"]).inc();

    let value = ROLLOUT_TRANSITIONS.with_label_values(&["paused-test"]).get();
    assert_eq!(value, 2, "Counter should increment correctly");
}

#[test]
fn render_should_be_idempotent_and_include_counters() {
    BATCHER_FLUSHES.inc();
    let first = render();
    let second = render();

    assert!(first.contains("rollout_batcher_flushes"));
    assert!(second.contains("rollout_batcher_flushes"));
}
