//! Rollout operations on the store.
//!
//! Every operation loads all stored versions of one configuration plus the
//! agents involved, lets the controller edit them, and commits every changed
//! record in one transaction under the writer lock. Two recomputes of the
//! same name therefore serialize, and the second sees the first's result.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

use tracing::debug;
use tracing::instrument;
use tracing::warn;

use super::sensitive::masked;
use super::SledStore;
use super::TreeWrites;
use crate::base_name;
use crate::parse_name_selector;
use crate::rollout::controller;
use crate::Agent;
use crate::Configuration;
use crate::Error;
use crate::EventType;
use crate::EventUpdates;
use crate::Kind;
use crate::Resource;
use crate::Result;
use crate::RolloutOptions;
use crate::RolloutStatus;
use crate::StorageError;
use crate::VersionSelector;

/// Every stored version of one configuration, with a snapshot to diff
/// against on commit.
struct ConfigurationVersions {
    latest_version: u64,
    versions: BTreeMap<u64, Configuration>,
    original: BTreeMap<u64, Configuration>,
}

impl ConfigurationVersions {
    fn latest(&self) -> &Configuration {
        &self.versions[&self.latest_version]
    }

    fn latest_mut(&mut self) -> Result<&mut Configuration> {
        let version = self.latest_version;
        self.get_mut(version)
    }

    fn get(
        &self,
        version: u64,
    ) -> &Configuration {
        &self.versions[&version]
    }

    fn get_mut(
        &mut self,
        version: u64,
    ) -> Result<&mut Configuration> {
        self.versions.get_mut(&version).ok_or_else(|| {
            StorageError::DataCorruption {
                location: format!("configuration version {version} not loaded"),
            }
            .into()
        })
    }

    /// Version whose rollout is tracked by the latest record.
    fn rollout_target(&self) -> u64 {
        let pending = self.latest().status.pending_version;
        if pending > 0 && self.versions.contains_key(&pending) {
            pending
        } else {
            self.latest_version
        }
    }

    /// Resolves a selector to a loaded version. A bare name means the
    /// latest version when `bare_is_latest`, the rollout target otherwise.
    fn resolve(
        &self,
        name: &str,
        selector: VersionSelector,
        bare_is_latest: bool,
    ) -> Result<u64> {
        let version = match selector {
            VersionSelector::Latest if bare_is_latest => self.latest_version,
            VersionSelector::Latest => self.rollout_target(),
            VersionSelector::Version(v) => v,
            VersionSelector::Current => self.latest().status.current_version,
            VersionSelector::Pending => self.latest().status.pending_version,
        };
        if self.versions.contains_key(&version) {
            Ok(version)
        } else {
            Err(Error::missing(Kind::Configuration, name))
        }
    }

    fn is_latest(
        &self,
        version: u64,
    ) -> bool {
        version == self.latest_version
    }

    /// Versions that differ from their loaded state.
    fn changed(&self) -> impl Iterator<Item = &Configuration> {
        self.versions
            .iter()
            .filter(|(v, c)| self.original.get(v) != Some(*c))
            .map(|(_, c)| c)
    }
}

impl SledStore {
    fn load_versions(
        &self,
        name: &str,
    ) -> Result<ConfigurationVersions> {
        let latest = self
            .latest(Kind::Configuration, name)?
            .ok_or_else(|| Error::missing(Kind::Configuration, name))?;
        let latest = into_configuration(latest)?;
        let latest_version = latest.version();

        let mut versions = BTreeMap::new();
        for resource in self.archive_entries(Kind::Configuration, name)? {
            let configuration = into_configuration(resource)?;
            versions.insert(configuration.version(), configuration);
        }
        versions.insert(latest_version, latest);

        Ok(ConfigurationVersions {
            latest_version,
            original: versions.clone(),
            versions,
        })
    }

    /// Starts the rollout of `name[:version]`; a bare name starts the latest
    /// version. Other active versions become `Replaced` and their agents are
    /// retargeted to this one. Starting a started rollout is a no-op.
    #[instrument(skip(self, options))]
    pub fn start_rollout(
        &self,
        key: &str,
        options: Option<RolloutOptions>,
    ) -> Result<Configuration> {
        let (name, selector) = parse_name_selector(key)?;

        let (configuration, updates) = {
            let _guard = self.writer.lock();
            let mut set = self.load_versions(name)?;
            let target = set.resolve(name, selector, true)?;

            if !controller::start(set.get_mut(target)?, options)? {
                debug!(name, version = target, "rollout already started");
                return masked_configuration(set.get(target).clone());
            }

            let mut replaced = Vec::new();
            for (version, configuration) in set.versions.iter_mut() {
                if *version != target && configuration.rollout_status().is_active() {
                    controller::replace(configuration);
                    replaced.push(configuration.reference());
                }
            }
            set.latest_mut()?.status.pending_version = target;

            self.recompute_locked(&mut set, target, &replaced)?
        };

        self.publish(updates);
        masked_configuration(configuration)
    }

    /// Pauses the tracked rollout (or the given version).
    #[instrument(skip(self))]
    pub fn pause_rollout(
        &self,
        key: &str,
    ) -> Result<Configuration> {
        let (name, selector) = parse_name_selector(key)?;

        let (configuration, updates) = {
            let _guard = self.writer.lock();
            let mut set = self.load_versions(name)?;
            let target = set.resolve(name, selector, false)?;

            controller::pause(set.get_mut(target)?)?;
            let updates = self.commit_versions(&set, &[], &HashMap::new())?;
            (set.get(target).clone(), updates)
        };

        self.publish(updates);
        masked_configuration(configuration)
    }

    /// Resumes a paused or errored rollout, then recomputes it.
    #[instrument(skip(self))]
    pub fn resume_rollout(
        &self,
        key: &str,
    ) -> Result<Configuration> {
        let (name, selector) = parse_name_selector(key)?;

        let (configuration, updates) = {
            let _guard = self.writer.lock();
            let mut set = self.load_versions(name)?;
            let target = set.resolve(name, selector, false)?;

            controller::resume(set.get_mut(target)?)?;
            self.recompute_locked(&mut set, target, &[])?
        };

        self.publish(updates);
        masked_configuration(configuration)
    }

    /// Recomputes the rollout tracked by the latest record of `name`.
    /// A `name:version` argument is reduced to its name.
    #[instrument(skip(self))]
    pub fn update_rollout(
        &self,
        name: &str,
    ) -> Result<Configuration> {
        let name = base_name(name);

        let (configuration, updates) = {
            let _guard = self.writer.lock();
            let mut set = self.load_versions(name)?;
            let target = set.rollout_target();
            self.recompute_locked(&mut set, target, &[])?
        };

        self.publish(updates);
        masked_configuration(configuration)
    }

    /// Recomputes every configuration with a rollout in progress. Failures
    /// are collected and do not stop the remaining recomputes.
    pub fn update_rollouts(&self) -> (Vec<Configuration>, Vec<Error>) {
        let names: Vec<String> = match self.scan_latest(Kind::Configuration) {
            Ok(resources) => resources
                .into_iter()
                .filter_map(Resource::into_configuration)
                .filter(|c| c.status.pending_version > 0 || c.rollout_status().is_active())
                .map(|c| c.metadata.name)
                .collect(),
            Err(e) => return (Vec::new(), vec![e]),
        };

        let mut updated = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            match self.update_rollout(&name) {
                Ok(configuration) => updated.push(configuration),
                Err(e) => {
                    warn!(%name, error = %e, "rollout update failed");
                    errors.push(e);
                }
            }
        }
        (updated, errors)
    }

    /// Runs the controller over `target` and its agents and commits the
    /// result. Caller holds the writer lock.
    fn recompute_locked(
        &self,
        set: &mut ConfigurationVersions,
        target: u64,
        replaced: &[String],
    ) -> Result<(Configuration, EventUpdates)> {
        let reference = set.get(target).reference();

        let mut ids: BTreeSet<String> =
            self.agent_index.select(&set.get(target).spec.selector.match_labels).into_iter().collect();
        ids.extend(self.agent_index.enrolled(&reference));
        for r in replaced {
            ids.extend(self.agent_index.enrolled(r));
        }

        let originals: HashMap<String, Agent> =
            self.load_agents(ids.iter())?.into_iter().map(|a| (a.id.clone(), a)).collect();
        let mut agents: Vec<Agent> = originals.values().cloned().collect();

        controller::retarget(&mut agents, replaced);
        let outcome = controller::recompute(set.get_mut(target)?, &mut agents);

        match outcome.transition {
            Some(RolloutStatus::Stable) => {
                let latest = set.latest_mut()?;
                latest.status.current_version = target;
                if latest.status.pending_version == target {
                    latest.status.pending_version = 0;
                }
            }
            Some(RolloutStatus::Error)
                if set.get(target).status.rollout.options.rollback_on_failure =>
            {
                let released = controller::release_waiting(&reference, &mut agents);
                let latest = set.latest_mut()?;
                if latest.status.pending_version == target {
                    latest.status.pending_version = 0;
                }
                let progress = controller::count(set.get(target), &agents);
                set.get_mut(target)?.status.rollout.progress = progress;
                debug!(%reference, released, "rolled back waiting agents");
            }
            _ => {}
        }

        let updates = self.commit_versions(set, &agents, &originals)?;
        Ok((set.get(target).clone(), updates))
    }

    /// Writes changed configuration versions and agents in one transaction
    /// and refreshes the agent index.
    fn commit_versions(
        &self,
        set: &ConfigurationVersions,
        agents: &[Agent],
        originals: &HashMap<String, Agent>,
    ) -> Result<EventUpdates> {
        let mut writes = TreeWrites::default();
        let mut updates = EventUpdates::new();

        for configuration in set.changed() {
            let resource = Resource::Configuration(configuration.clone());
            if set.is_latest(configuration.version()) {
                writes.put_resource(&resource)?;
                updates.include_resource(masked(resource), EventType::Rollout);
            } else {
                writes.put_archive(&resource)?;
                updates.include_archived_configuration(masked_configuration(configuration.clone())?, EventType::Rollout);
            }
        }

        let changed_agents: Vec<&Agent> =
            agents.iter().filter(|a| originals.get(&a.id) != Some(*a)).collect();
        for agent in &changed_agents {
            writes.put_agent(agent)?;
            updates.include_agent((*agent).clone(), EventType::Rollout);
        }

        self.commit(writes)?;
        for agent in changed_agents {
            self.agent_index.upsert(agent);
        }
        Ok(updates)
    }
}

fn into_configuration(resource: Resource) -> Result<Configuration> {
    let kind = resource.kind();
    let name = resource.name().to_string();
    resource.into_configuration().ok_or_else(|| {
        StorageError::DataCorruption {
            location: format!("{} stored as {kind}", name),
        }
        .into()
    })
}

fn masked_configuration(configuration: Configuration) -> Result<Configuration> {
    into_configuration(masked(Resource::Configuration(configuration)))
}
