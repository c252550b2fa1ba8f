use std::path::Path;

use tempfile::TempDir;

use crate::Agent;
use crate::FleetConfig;
use crate::SledStore;

pub(crate) fn test_config(db_root_dir: &Path) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.storage.db_root_dir = db_root_dir.to_path_buf();
    config.storage.flush_every_ms = 0;
    config.logging.log_dir = db_root_dir.join("logs");
    config
}

/// Store over a fresh temporary directory. Keep the directory alive for as
/// long as the store is used.
pub(crate) fn temp_store() -> (SledStore, TempDir) {
    temp_store_with(|_| {})
}

pub(crate) fn temp_store_with(customize: impl FnOnce(&mut FleetConfig)) -> (SledStore, TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let mut config = test_config(dir.path());
    customize(&mut config);
    let store = SledStore::open(&config).expect("open store");
    (store, dir)
}

/// Registers `count` agents labelled `env=<env>`, ids `<prefix>-000`...
pub(crate) fn register_agents(
    store: &SledStore,
    prefix: &str,
    env: &str,
    count: usize,
) -> Vec<Agent> {
    let ids: Vec<String> = (0..count).map(|i| format!("{prefix}-{i:03}")).collect();
    store
        .upsert_agents(&ids, |agent| {
            agent.labels.insert("env".into(), env.into());
        })
        .expect("register agents")
}

/// Every agent holding a pending reference finishes applying it.
pub(crate) fn complete_pending(store: &SledStore) -> usize {
    let ids: Vec<String> = store.agent_index().search(&crate::Query::new()).into_iter().collect();
    let changed = store
        .upsert_agents(&ids, |agent| {
            let status = &mut agent.configuration_status;
            if !status.pending.is_empty() {
                status.current = std::mem::take(&mut status.pending);
            }
        })
        .expect("complete pending agents");
    changed.len()
}
