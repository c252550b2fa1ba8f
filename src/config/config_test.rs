use serial_test::serial;
use temp_env::with_vars;

use super::*;

fn cleanup_all_fleet_env_vars() {
    for (key, _) in std::env::vars() {
        if key.starts_with("FLEET__") || key == "CONFIG_PATH" {
            std::env::remove_var(&key);
        }
    }
}

#[test]
#[serial]
fn default_config_should_initialize_with_hardcoded_values() {
    let config = FleetConfig::default();

    assert_eq!(config.rollout.batch_interval_ms, 100);
    assert_eq!(config.rollout.queue_capacity, 100);
    assert_eq!(config.rollout.initial, 3);
    assert_eq!(config.rollout.multiplier, 5.0);
    assert_eq!(config.rollout.maximum, 100);
    assert_eq!(config.rollout.max_errors, 0);
    assert!(config.event_bus.subscriber_buffer_size > 0);
}

#[test]
#[serial]
fn default_options_should_mirror_rollout_section() {
    let config = FleetConfig::default();
    assert_eq!(config.rollout.default_options(), crate::RolloutOptions::default());
}

#[test]
#[serial]
fn new_should_merge_environment_overrides() {
    cleanup_all_fleet_env_vars();
    with_vars(
        vec![
            ("FLEET__ROLLOUT__BATCH_INTERVAL_MS", Some("50")),
            ("FLEET__EVENT_BUS__MAX_EVENTS_TO_MERGE", Some("7")),
        ],
        || {
            let config = FleetConfig::new().unwrap();

            assert_eq!(config.rollout.batch_interval_ms, 50);
            assert_eq!(config.event_bus.max_events_to_merge, 7);
        },
    );
}

#[test]
#[serial]
fn with_override_config_should_merge_file_settings() {
    cleanup_all_fleet_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("fleet.toml");

    std::fs::write(
        &config_path,
        r#"
        [storage]
        db_root_dir = "/tmp/fleet/db"

        [rollout]
        initial = 2
        multiplier = 2.0
        maximum = 30
        "#,
    )
    .unwrap();

    let empty_vars: Vec<(&str, Option<&str>)> = vec![];
    with_vars(empty_vars, || {
        let base_config = FleetConfig::new().expect("success");
        let config = base_config.with_override_config(config_path.to_str().unwrap()).unwrap();

        assert_eq!(config.storage.db_root_dir.to_str(), Some("/tmp/fleet/db"));
        assert_eq!(config.rollout.initial, 2);
        assert_eq!(config.rollout.multiplier, 2.0);
        assert_eq!(config.rollout.maximum, 30);
        // untouched keys keep their defaults
        assert_eq!(config.rollout.batch_interval_ms, 100);
    });
}

#[test]
#[serial]
fn config_path_should_be_required_when_set() {
    cleanup_all_fleet_env_vars();
    with_vars(vec![("CONFIG_PATH", Some("/nonexistent/fleet.toml"))], || {
        assert!(FleetConfig::new().is_err());
    });
}

#[test]
fn validation_should_accept_defaults_in_temp_dirs() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = FleetConfig::default();
    config.storage.db_root_dir = temp_dir.path().join("db");
    config.logging.log_dir = temp_dir.path().join("logs");

    let config = config.validate().unwrap();
    assert!(config.storage.db_root_dir.is_dir());
    assert!(config.logging.log_dir.is_dir());
}

#[test]
fn validation_should_reject_zero_initial_phase() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = FleetConfig::default();
    config.storage.db_root_dir = temp_dir.path().join("db");
    config.logging.log_dir = temp_dir.path().join("logs");
    config.rollout.initial = 0;

    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn validation_should_reject_shrinking_multiplier() {
    let mut rollout = RolloutConfig::default();
    rollout.multiplier = 0.5;
    assert!(rollout.validate().is_err());
}

#[test]
fn validation_should_reject_zero_buffers() {
    let mut event_bus = EventBusConfig::default();
    event_bus.subscriber_buffer_size = 0;
    assert!(event_bus.validate().is_err());

    let mut rollout = RolloutConfig::default();
    rollout.queue_capacity = 0;
    assert!(rollout.validate().is_err());
}

#[test]
fn validate_directory_should_reject_files() {
    let temp_dir = tempfile::tempdir().unwrap();
    let file = temp_dir.path().join("not-a-dir");
    std::fs::write(&file, b"x").unwrap();

    assert!(validate_directory(&file, "db_root_dir").is_err());
    assert!(validate_directory(Path::new(""), "db_root_dir").is_err());
}

#[test]
fn sweep_interval_zero_disables_sweep() {
    let mut rollout = RolloutConfig::default();
    assert!(rollout.sweep_interval().is_some());
    rollout.sweep_interval_ms = 0;
    assert!(rollout.sweep_interval().is_none());
}
