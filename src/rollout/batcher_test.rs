use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::Agent;
use crate::Configuration;
use crate::Error;
use crate::MockStore;
use crate::RolloutConfig;

fn config(batch_interval_ms: u64) -> RolloutConfig {
    RolloutConfig {
        batch_interval_ms,
        queue_capacity: 4,
        ..Default::default()
    }
}

/// Mock store recording every recomputed name.
fn recording_store() -> (MockStore, Arc<Mutex<Vec<String>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();
    let mut store = MockStore::new();
    store.expect_update_rollout().returning(move |name| {
        recorded.lock().push(name.to_string());
        Ok(Configuration::new(name))
    });
    (store, calls)
}

fn agent(
    id: &str,
    current: &str,
    pending: &str,
    future: &str,
) -> Agent {
    let mut agent = Agent::new(id);
    agent.configuration_status.current = current.into();
    agent.configuration_status.pending = pending.into();
    agent.configuration_status.future = future.into();
    agent
}

#[tokio::test(start_paused = true)]
async fn batch_should_recompute_each_base_name_once() {
    let (store, calls) = recording_store();
    let batcher = RolloutBatcher::new(Arc::new(store), &config(100));
    let token = CancellationToken::new();

    batcher
        .batch(&token, &[agent("a1", "cfg:1", "cfg:2", ""), agent("a2", "", "", "other:3")])
        .await
        .unwrap();
    batcher.batch(&token, &[agent("a3", "cfg:2", "", "")]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(*calls.lock(), vec!["cfg".to_string(), "other".to_string()]);
    batcher.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn names_queued_after_a_flush_should_wait_for_the_next_tick() {
    let (store, calls) = recording_store();
    let batcher = RolloutBatcher::new(Arc::new(store), &config(100));
    let token = CancellationToken::new();

    batcher.batch(&token, &[agent("a1", "cfg:1", "", "")]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(calls.lock().len(), 1);

    batcher.batch(&token, &[agent("a1", "cfg:1", "", "")]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.lock().len(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.lock().len(), 2);
    batcher.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn agents_without_references_should_not_queue_anything() {
    let mut store = MockStore::new();
    store.expect_update_rollout().times(0);
    let batcher = RolloutBatcher::new(Arc::new(store), &config(100));

    batcher.batch(&CancellationToken::new(), &[Agent::new("a1")]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    batcher.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn batch_should_return_cancelled_when_token_is_cancelled() {
    let (store, calls) = recording_store();
    let batcher = RolloutBatcher::new(Arc::new(store), &config(100));
    let token = CancellationToken::new();
    token.cancel();

    let result = batcher.batch(&token, &[agent("a1", "cfg:1", "", "")]).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    batcher.shutdown(Duration::from_secs(1)).await.unwrap();
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn batch_after_shutdown_should_return_cancelled() {
    let (store, _calls) = recording_store();
    let batcher = RolloutBatcher::new(Arc::new(store), &config(100));
    batcher.shutdown(Duration::from_secs(1)).await.unwrap();

    let result = batcher.batch(&CancellationToken::new(), &[agent("a1", "cfg:1", "", "")]).await;

    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn shutdown_should_be_idempotent() {
    let (store, _calls) = recording_store();
    let batcher = RolloutBatcher::new(Arc::new(store), &config(100));

    batcher.shutdown(Duration::from_secs(1)).await.unwrap();
    batcher.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn recompute_failures_should_not_stop_the_worker() {
    let calls = Arc::new(Mutex::new(0));
    let counted = calls.clone();
    let mut store = MockStore::new();
    store.expect_update_rollout().returning(move |_| {
        let mut calls = counted.lock();
        *calls += 1;
        if *calls == 1 {
            Err(Error::invalid("broken configuration"))
        } else {
            Ok(Configuration::new("cfg"))
        }
    });
    let batcher = RolloutBatcher::new(Arc::new(store), &config(100));
    let token = CancellationToken::new();

    batcher.batch(&token, &[agent("a1", "cfg:1", "", "")]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    batcher.batch(&token, &[agent("a1", "cfg:1", "", "")]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(*calls.lock(), 2);
    batcher.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_should_time_out_when_worker_is_stuck() {
    let mut store = MockStore::new();
    store.expect_update_rollout().returning(|name| {
        std::thread::sleep(Duration::from_millis(500));
        Ok(Configuration::new(name))
    });
    let batcher = RolloutBatcher::new(Arc::new(store), &config(20));

    batcher.batch(&CancellationToken::new(), &[agent("a1", "cfg:1", "", "")]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = batcher.shutdown(Duration::from_millis(10)).await;
    assert!(matches!(result, Err(Error::Timeout(_))));
}
