use std::path::Path;
use std::time::Duration;

use fleet_plane::Configuration;
use fleet_plane::ControlPlane;
use fleet_plane::EventType;
use fleet_plane::FleetConfig;
use fleet_plane::Kind;
use fleet_plane::Query;
use fleet_plane::Resource;
use fleet_plane::RolloutOptions;
use fleet_plane::RolloutStatus;
use fleet_plane::UpdateStatus;
use fleet_plane::FIELD_ROLLOUT_PENDING;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn config(dir: &Path) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.storage.db_root_dir = dir.join("db");
    config.storage.flush_every_ms = 0;
    config.logging.log_dir = dir.join("logs");
    config.rollout.batch_interval_ms = 50;
    config.rollout.sweep_interval_ms = 0;
    config
}

fn open(customize: impl FnOnce(&mut FleetConfig)) -> (ControlPlane, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    customize(&mut config);
    (ControlPlane::open(config).unwrap(), dir)
}

fn prod_configuration(name: &str) -> Resource {
    Resource::Configuration(Configuration::new(name).with_selector([("env", "prod")]))
}

fn options() -> Option<RolloutOptions> {
    Some(RolloutOptions {
        initial: 2,
        multiplier: 2.0,
        maximum: 30,
        ..Default::default()
    })
}

fn ids(
    prefix: &str,
    count: usize,
) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}-{i:03}")).collect()
}

async fn register(
    plane: &ControlPlane,
    token: &CancellationToken,
    count: usize,
) {
    plane
        .upsert_agents(token, &ids("agent", count), |agent| {
            agent.labels.insert("env".into(), "prod".into());
        })
        .await
        .unwrap();
}

fn configuration(
    plane: &ControlPlane,
    key: &str,
) -> Configuration {
    plane.resource(Kind::Configuration, key).unwrap().into_configuration().unwrap()
}

#[tokio::test(start_paused = true)]
async fn agent_updates_should_advance_rollout_through_the_batcher() {
    let (plane, _dir) = open(|_| {});
    let token = CancellationToken::new();
    register(&plane, &token, 10).await;
    plane.apply_resources(vec![prod_configuration("c1")]).unwrap();
    plane.start_rollout("c1", options()).unwrap();

    plane
        .upsert_agents(&token, &ids("agent", 2), |agent| {
            let status = &mut agent.configuration_status;
            status.current = std::mem::take(&mut status.pending);
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let c1 = configuration(&plane, "c1");
    assert_eq!(c1.status.rollout.phase, 2);
    assert_eq!(c1.status.rollout.progress.completed, 2);
    assert_eq!(c1.status.rollout.progress.pending, 4);
    plane.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn sweep_should_recompute_rollouts_without_agent_traffic() {
    let (plane, _dir) = open(|config| config.rollout.sweep_interval_ms = 1000);
    let token = CancellationToken::new();
    register(&plane, &token, 10).await;
    plane.apply_resources(vec![prod_configuration("c1")]).unwrap();
    plane.start_rollout("c1", options()).unwrap();

    // Writes through the store skip the batcher.
    plane
        .store()
        .upsert_agents(&ids("agent", 2), |agent| {
            let status = &mut agent.configuration_status;
            status.current = std::mem::take(&mut status.pending);
        })
        .unwrap();
    assert_eq!(configuration(&plane, "c1").status.rollout.phase, 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(configuration(&plane, "c1").status.rollout.phase, 2);
    plane.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn deleted_agents_should_leave_the_rollout() {
    let (plane, _dir) = open(|_| {});
    let token = CancellationToken::new();
    register(&plane, &token, 5).await;
    plane.apply_resources(vec![prod_configuration("c1")]).unwrap();
    plane.start_rollout("c1", options()).unwrap();

    let deleted = plane.delete_agents(&token, ids("agent", 2)).await.unwrap();
    assert_eq!(deleted.len(), 2);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let c1 = configuration(&plane, "c1");
    assert_eq!(c1.status.rollout.progress.total(), 3);
    assert!(plane.agent("agent-000").unwrap().is_none());
    plane.shutdown().await.unwrap();
}

#[tokio::test]
async fn search_agents_should_match_rollout_fields() {
    let (plane, _dir) = open(|_| {});
    let token = CancellationToken::new();
    register(&plane, &token, 5).await;
    plane.apply_resources(vec![prod_configuration("c1")]).unwrap();
    plane.start_rollout("c1", options()).unwrap();

    let query = Query::new().with_term(FIELD_ROLLOUT_PENDING, "c1:1");
    let pending: Vec<String> = plane.search_agents(&query).unwrap().into_iter().map(|a| a.id).collect();
    assert_eq!(pending, ids("agent", 2));

    let parsed = Query::parse("env=prod").unwrap();
    assert_eq!(plane.search_agents(&parsed).unwrap().len(), 5);
    plane.shutdown().await.unwrap();
}

#[tokio::test]
async fn merged_subscription_should_deliver_applied_resources() {
    let (plane, _dir) = open(|config| config.event_bus.max_merge_latency_ms = 10);
    let token = CancellationToken::new();
    let mut subscription = plane.subscribe_merged(&token);

    plane
        .apply_resources(vec![prod_configuration("c1"), prod_configuration("c2")])
        .unwrap();

    let batch = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(batch.contains_resource_event(Kind::Configuration, "c1", EventType::Insert));
    assert!(batch.contains_resource_event(Kind::Configuration, "c2", EventType::Insert));
    token.cancel();
    plane.shutdown().await.unwrap();
}

#[tokio::test]
async fn state_should_survive_shutdown_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    {
        let plane = ControlPlane::open(config(dir.path())).unwrap();
        register(&plane, &token, 3).await;
        let statuses = plane.apply_resources(vec![prod_configuration("c1")]).unwrap();
        assert_eq!(statuses[0].status, UpdateStatus::Created);
        plane.start_rollout("c1", options()).unwrap();
        plane.shutdown().await.unwrap();
    }

    let plane = ControlPlane::open(config(dir.path())).unwrap();
    let c1 = configuration(&plane, "c1");
    assert_eq!(c1.rollout_status(), RolloutStatus::Started);
    assert_eq!(plane.agents(&[("env".to_string(), "prod".to_string())].into()).unwrap().len(), 3);
    assert_eq!(plane.store().agent_index().enrolled("c1:1").len(), 3);
    plane.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_should_be_idempotent() {
    let (plane, _dir) = open(|config| config.rollout.sweep_interval_ms = 1000);

    plane.shutdown().await.unwrap();
    plane.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn metrics_should_count_batcher_flushes() {
    let (plane, _dir) = open(|_| {});
    let token = CancellationToken::new();
    register(&plane, &token, 3).await;
    plane.apply_resources(vec![prod_configuration("c1")]).unwrap();
    plane.start_rollout("c1", options()).unwrap();

    plane
        .upsert_agent(&token, "agent-000", |agent| {
            agent.labels.insert("zone".into(), "a".into());
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let rendered = fleet_plane::metrics::render();
    assert!(rendered.contains("rollout_batcher_flushes"), "{rendered}");
    assert!(rendered.contains("resources_applied"), "{rendered}");
    plane.shutdown().await.unwrap();
}
