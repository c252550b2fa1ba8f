//! Entry point for an embedding process.
//!
//! [`ControlPlane`] owns the [`SledStore`], the [`RolloutBatcher`] fed by
//! every agent write, and the periodic sweep that recomputes rollouts still
//! in progress.
//!
//! ## Example Usage
//! ```rust,no_run
//! # async fn run() -> fleet_plane::Result<()> {
//! use fleet_plane::{ControlPlane, FleetConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let plane = ControlPlane::open(FleetConfig::new()?.validate()?)?;
//! let token = CancellationToken::new();
//! plane
//!     .upsert_agent(&token, "agent-1", |agent| {
//!         agent.labels.insert("env".into(), "prod".into());
//!     })
//!     .await?;
//! plane.shutdown().await
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::metrics;
use crate::utils::async_task::spawn_task;
use crate::Agent;
use crate::Configuration;
use crate::EventUpdates;
use crate::FleetConfig;
use crate::Kind;
use crate::Labels;
use crate::MergeOptions;
use crate::Query;
use crate::Resource;
use crate::ResourceStatus;
use crate::Result;
use crate::RolloutBatcher;
use crate::RolloutOptions;
use crate::SledStore;
use crate::Store;
use crate::Subscription;

pub struct ControlPlane {
    store: Arc<SledStore>,
    batcher: RolloutBatcher,
    sweep: Mutex<Option<JoinHandle<()>>>,
    stop: CancellationToken,
    config: Arc<FleetConfig>,
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("store", &self.store)
            .field("batcher", &self.batcher)
            .finish()
    }
}

impl ControlPlane {
    /// Opens the store and starts the background workers. Must be called
    /// inside a tokio runtime.
    pub fn open(config: FleetConfig) -> Result<Self> {
        let store = Arc::new(SledStore::open(&config)?);
        Ok(Self::with_store(store, config))
    }

    pub fn with_store(
        store: Arc<SledStore>,
        config: FleetConfig,
    ) -> Self {
        metrics::register();
        let batcher = RolloutBatcher::new(store.clone(), &config.rollout);
        let stop = CancellationToken::new();

        let sweep = config.rollout.sweep_interval().map(|interval| {
            let store = store.clone();
            let stop = stop.clone();
            spawn_task("rollout-sweep", move || sweep_rollouts(store, interval, stop))
        });

        info!(
            batch_interval_ms = config.rollout.batch_interval_ms,
            sweep_interval_ms = config.rollout.sweep_interval_ms,
            "control plane started"
        );
        Self {
            store,
            batcher,
            sweep: Mutex::new(sweep),
            stop,
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<SledStore> {
        &self.store
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    // ---------------------------------------------------------------
    // Resources

    pub fn apply_resources(
        &self,
        resources: Vec<Resource>,
    ) -> Result<Vec<ResourceStatus>> {
        self.store.apply_resources(resources)
    }

    pub fn delete_resources(
        &self,
        resources: Vec<Resource>,
    ) -> Result<Vec<ResourceStatus>> {
        self.store.delete_resources(resources)
    }

    pub fn resource(
        &self,
        kind: Kind,
        key: &str,
    ) -> Result<Resource> {
        self.store.resource(kind, key)
    }

    pub fn resources(
        &self,
        kind: Kind,
    ) -> Result<Vec<Resource>> {
        self.store.resources(kind)
    }

    pub fn delete_resource(
        &self,
        kind: Kind,
        name: &str,
    ) -> Result<Option<Resource>> {
        self.store.delete_resource(kind, name)
    }

    pub fn resource_history(
        &self,
        kind: Kind,
        name: &str,
    ) -> Result<Vec<Resource>> {
        self.store.resource_history(kind, name)
    }

    // ---------------------------------------------------------------
    // Agents

    /// Mutates one agent and queues the rollouts it takes part in.
    pub async fn upsert_agent<F>(
        &self,
        token: &CancellationToken,
        id: &str,
        updater: F,
    ) -> Result<Option<Agent>>
    where
        F: FnOnce(&mut Agent),
    {
        let changed = self.store.upsert_agent(id, updater)?;
        if let Some(agent) = &changed {
            self.batcher.batch(token, std::slice::from_ref(agent)).await?;
        }
        Ok(changed)
    }

    pub async fn upsert_agents<F>(
        &self,
        token: &CancellationToken,
        ids: &[String],
        updater: F,
    ) -> Result<Vec<Agent>>
    where
        F: FnMut(&mut Agent),
    {
        let changed = self.store.upsert_agents(ids, updater)?;
        self.batcher.batch(token, &changed).await?;
        Ok(changed)
    }

    pub async fn replace_agents(
        &self,
        token: &CancellationToken,
        agents: Vec<Agent>,
    ) -> Result<Vec<Agent>> {
        let changed = self.store.replace_agents(agents)?;
        self.batcher.batch(token, &changed).await?;
        Ok(changed)
    }

    /// Deletes agents; rollouts they were part of are recounted.
    pub async fn delete_agents(
        &self,
        token: &CancellationToken,
        ids: Vec<String>,
    ) -> Result<Vec<Agent>> {
        let deleted = self.store.delete_agents(ids)?;
        self.batcher.batch(token, &deleted).await?;
        Ok(deleted)
    }

    pub fn agent(
        &self,
        id: &str,
    ) -> Result<Option<Agent>> {
        self.store.agent(id)
    }

    pub fn agents(
        &self,
        selector: &Labels,
    ) -> Result<Vec<Agent>> {
        self.store.agents(selector)
    }

    /// Agents whose labels or rollout fields match every query term.
    pub fn search_agents(
        &self,
        query: &Query,
    ) -> Result<Vec<Agent>> {
        let ids = self.store.agent_index().search(query);
        self.store.load_agents(ids.iter())
    }

    // ---------------------------------------------------------------
    // Rollouts

    pub fn start_rollout(
        &self,
        key: &str,
        options: Option<RolloutOptions>,
    ) -> Result<Configuration> {
        self.store.start_rollout(key, options)
    }

    pub fn pause_rollout(
        &self,
        key: &str,
    ) -> Result<Configuration> {
        self.store.pause_rollout(key)
    }

    pub fn resume_rollout(
        &self,
        key: &str,
    ) -> Result<Configuration> {
        self.store.resume_rollout(key)
    }

    pub fn update_rollout(
        &self,
        name: &str,
    ) -> Result<Configuration> {
        self.store.update_rollout(name)
    }

    pub fn update_rollouts(&self) -> (Vec<Configuration>, Vec<crate::Error>) {
        self.store.update_rollouts()
    }

    // ---------------------------------------------------------------
    // Notifications

    pub fn subscribe(
        &self,
        token: &CancellationToken,
    ) -> Subscription<EventUpdates> {
        self.store.subscribe(token)
    }

    /// Subscription merging update batches within the configured bounds.
    pub fn subscribe_merged(
        &self,
        token: &CancellationToken,
    ) -> Subscription<EventUpdates> {
        self.store.updates().subscribe_merged(token, MergeOptions::from(&self.config.event_bus))
    }

    /// Stops the sweep and the batcher, then flushes the database.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop.cancel();
        let deadline = self.config.rollout.shutdown_timeout();

        let sweep = self.sweep.lock().take();
        if let Some(sweep) = sweep {
            if tokio::time::timeout(deadline, sweep).await.is_err() {
                warn!(?deadline, "rollout sweep did not stop in time");
            }
        }
        self.batcher.shutdown(deadline).await?;
        self.store.flush()?;

        info!("control plane stopped");
        Ok(())
    }
}

async fn sweep_rollouts(
    store: Arc<SledStore>,
    every: Duration,
    stop: CancellationToken,
) -> Result<()> {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            _ = interval.tick() => {
                let store = store.clone();
                let (updated, errors) = match tokio::task::spawn_blocking(move || store.update_rollouts()).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(error = %e, "rollout sweep task failed");
                        continue;
                    }
                };
                for e in &errors {
                    warn!(error = %e, "rollout sweep recompute failed");
                }
                debug!(updated = updated.len(), failed = errors.len(), "rollout sweep finished");
            }
        }
    }
}
