//! Sled-backed control-plane store.
//!
//! # Write path
//!
//! ```text
//! writer lock ─┬─ read prior state (resources, archive range, agents)
//!              ├─ build every put/remove for the operation
//!              ├─ commit them in one multi-tree transaction
//!              ├─ refresh AgentIndex / ConfigurationIndex
//!              └─ expand the update batch with dependents
//! unlock ──────── publish the batch on the EventBus
//! ```
//!
//! sled transactions cannot range-scan, so archive ranges are scanned under
//! the writer lock before the transaction opens; the lock is what keeps the
//! scan and the commit consistent. Reads never take the lock.

use std::collections::BTreeSet;
use std::collections::HashSet;

use nanoid::nanoid;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use sled::transaction::ConflictableTransactionResult;
use sled::Transactional;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use super::init_sled_db;
use super::keys::agent_key;
use super::keys::agent_prefix;
use super::keys::archive_key;
use super::keys::archive_prefix;
use super::keys::display_key;
use super::keys::resource_key;
use super::keys::resource_prefix;
use super::sensitive;
use super::sensitive::masked;
use super::Store;
use crate::constants::AGENTS_TREE;
use crate::constants::ARCHIVE_TREE;
use crate::constants::RESOURCES_TREE;
use crate::metrics::RESOURCES_APPLIED;
use crate::parse_name_selector;
use crate::utils::time::timestamp_millis;
use crate::versioned_name;
use crate::Agent;
use crate::AgentIndex;
use crate::Configuration;
use crate::ConfigurationIndex;
use crate::ConfigurationStatus;
use crate::DependencyUpdateTracker;
use crate::Error;
use crate::EventBus;
use crate::EventType;
use crate::EventUpdates;
use crate::FleetConfig;
use crate::Kind;
use crate::Labels;
use crate::Resource;
use crate::ResourceError;
use crate::ResourceRef;
use crate::ResourceSource;
use crate::ResourceStatus;
use crate::ResourceType;
use crate::Result;
use crate::Rollout;
use crate::RolloutOptions;
use crate::RolloutStatus;
use crate::StorageError;
use crate::Subscription;
use crate::UpdateStatus;
use crate::VersionSelector;

/// Puts and removes for one logical operation, committed together.
#[derive(Default)]
pub(crate) struct TreeWrites {
    resources: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    archive: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    agents: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl TreeWrites {
    pub(crate) fn put_resource(
        &mut self,
        resource: &Resource,
    ) -> Result<()> {
        let key = resource_key(resource.kind(), resource.name());
        self.resources.push((key, Some(bincode::serialize(resource)?)));
        Ok(())
    }

    pub(crate) fn put_archive(
        &mut self,
        resource: &Resource,
    ) -> Result<()> {
        let key = archive_key(resource.kind(), resource.name(), resource.version())?;
        self.archive.push((key, Some(bincode::serialize(resource)?)));
        Ok(())
    }

    pub(crate) fn put_agent(
        &mut self,
        agent: &Agent,
    ) -> Result<()> {
        self.agents.push((agent_key(&agent.id), Some(bincode::serialize(agent)?)));
        Ok(())
    }

    fn remove_resource(
        &mut self,
        key: Vec<u8>,
    ) {
        self.resources.push((key, None));
    }

    fn remove_archive(
        &mut self,
        key: Vec<u8>,
    ) {
        self.archive.push((key, None));
    }

    fn remove_agent(
        &mut self,
        key: Vec<u8>,
    ) {
        self.agents.push((key, None));
    }

    fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.archive.is_empty() && self.agents.is_empty()
    }
}

/// Result of one resource upsert, before notification.
pub(crate) struct Upserted {
    pub(crate) status: UpdateStatus,
    pub(crate) resource: Resource,
    pub(crate) updates: EventUpdates,
}

pub struct SledStore {
    db: sled::Db,
    resources: sled::Tree,
    archive: sled::Tree,
    agents: sled::Tree,
    /// Serializes every mutation
    pub(crate) writer: Mutex<()>,
    pub(crate) agent_index: AgentIndex,
    pub(crate) configuration_index: ConfigurationIndex,
    updates: EventBus<EventUpdates>,
    default_rollout_options: RolloutOptions,
}

impl std::fmt::Debug for SledStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("resources", &self.resources.len())
            .field("archive", &self.archive.len())
            .field("agents", &self.agents.len())
            .finish()
    }
}

impl SledStore {
    /// Opens the database under `config.storage.db_root_dir`.
    pub fn open(config: &FleetConfig) -> Result<Self> {
        let db = init_sled_db(&config.storage)?;
        Self::new(db, config)
    }

    /// Wraps an opened database and rebuilds the in-memory indexes from it.
    pub fn new(
        db: sled::Db,
        config: &FleetConfig,
    ) -> Result<Self> {
        let resources = db.open_tree(RESOURCES_TREE)?;
        let archive = db.open_tree(ARCHIVE_TREE)?;
        let agents = db.open_tree(AGENTS_TREE)?;

        let store = Self {
            db,
            resources,
            archive,
            agents,
            writer: Mutex::new(()),
            agent_index: AgentIndex::new(),
            configuration_index: ConfigurationIndex::new(),
            updates: EventBus::new(&config.event_bus),
            default_rollout_options: config.rollout.default_options(),
        };
        store.rebuild_indexes()?;

        info!(
            resources = store.resources.len(),
            archived = store.archive.len(),
            agents = store.agents.len(),
            "control plane store opened"
        );
        Ok(store)
    }

    pub fn updates(&self) -> &EventBus<EventUpdates> {
        &self.updates
    }

    /// Subscribes to update batches until `token` is cancelled.
    pub fn subscribe(
        &self,
        token: &CancellationToken,
    ) -> Subscription<EventUpdates> {
        self.updates.subscribe(token)
    }

    pub fn agent_index(&self) -> &AgentIndex {
        &self.agent_index
    }

    pub fn configuration_index(&self) -> &ConfigurationIndex {
        &self.configuration_index
    }

    pub fn default_rollout_options(&self) -> &RolloutOptions {
        &self.default_rollout_options
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Latest versions of `kind` accepted by `predicate`.
    pub fn list<P>(
        &self,
        kind: Kind,
        predicate: P,
    ) -> Result<Vec<Resource>>
    where
        P: Fn(&Resource) -> bool,
    {
        Ok(self.scan_latest(kind)?.into_iter().filter(|r| predicate(r)).map(masked).collect())
    }

    // ---------------------------------------------------------------
    // Agents

    /// Creates or mutates one agent through `updater`.
    pub fn upsert_agent<F>(
        &self,
        id: &str,
        updater: F,
    ) -> Result<Option<Agent>>
    where
        F: FnOnce(&mut Agent),
    {
        let mut updater = Some(updater);
        let changed = self.upsert_agents(&[id.to_string()], |agent| {
            if let Some(f) = updater.take() {
                f(agent);
            }
        })?;
        Ok(changed.into_iter().next())
    }

    /// Creates or mutates agents in one transaction. Returns the agents
    /// that changed, ready to hand to the rollout batcher.
    #[instrument(skip(self, updater), fields(count = ids.len()))]
    pub fn upsert_agents<F>(
        &self,
        ids: &[String],
        mut updater: F,
    ) -> Result<Vec<Agent>>
    where
        F: FnMut(&mut Agent),
    {
        let (changed, updates) = {
            let _guard = self.writer.lock();

            let mut seen = HashSet::new();
            let mut writes = TreeWrites::default();
            let mut updates = EventUpdates::new();
            let mut changed = Vec::new();

            for id in ids.iter().filter(|id| seen.insert(id.as_str())) {
                let prior = self.load_agent(id)?;
                let mut agent = prior.clone().unwrap_or_else(|| Agent::new(id.clone()));
                updater(&mut agent);
                agent.id = id.clone();

                if prior.as_ref() == Some(&agent) {
                    continue;
                }
                writes.put_agent(&agent)?;
                updates.include_agent(agent.clone(), agent_event_type(prior.as_ref(), &agent));
                changed.push(agent);
            }

            self.commit(writes)?;
            for agent in &changed {
                self.agent_index.upsert(agent);
            }
            debug!(changed = changed.len(), "agents upserted");
            (changed, updates)
        };

        self.publish(updates);
        Ok(changed)
    }

    // ---------------------------------------------------------------
    // Reads (unmasked, internal)

    fn decode<T: DeserializeOwned>(
        key: &[u8],
        bytes: &[u8],
    ) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| {
            warn!(key = %display_key(key), error = %e, "stored payload could not be decoded");
            Error::from(StorageError::DataCorruption {
                location: display_key(key),
            })
        })
    }

    pub(crate) fn latest(
        &self,
        kind: Kind,
        name: &str,
    ) -> Result<Option<Resource>> {
        let key = resource_key(kind, name);
        match self.resources.get(&key)? {
            Some(bytes) => Ok(Some(Self::decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn archived(
        &self,
        kind: Kind,
        name: &str,
        version: u64,
    ) -> Result<Option<Resource>> {
        let key = match archive_key(kind, name, version) {
            Ok(key) => key,
            Err(_) => return Ok(None),
        };
        match self.archive.get(&key)? {
            Some(bytes) => Ok(Some(Self::decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Archived versions of one resource, oldest first.
    pub(crate) fn archive_entries(
        &self,
        kind: Kind,
        name: &str,
    ) -> Result<Vec<Resource>> {
        let mut entries = Vec::new();
        for item in self.archive.scan_prefix(archive_prefix(kind, name)) {
            let (key, bytes) = item?;
            match Self::decode::<Resource>(&key, &bytes) {
                Ok(resource) => entries.push(resource),
                Err(_) => continue,
            }
        }
        Ok(entries)
    }

    fn version_of(
        &self,
        kind: Kind,
        name: &str,
        version: u64,
    ) -> Result<Option<Resource>> {
        match self.latest(kind, name)? {
            Some(latest) if latest.version() == version => Ok(Some(latest)),
            Some(_) => self.archived(kind, name, version),
            None => Ok(None),
        }
    }

    /// Latest version of every resource of `kind`; malformed payloads are
    /// logged and skipped.
    pub(crate) fn scan_latest(
        &self,
        kind: Kind,
    ) -> Result<Vec<Resource>> {
        let mut resources = Vec::new();
        for item in self.resources.scan_prefix(resource_prefix(kind)) {
            let (key, bytes) = item?;
            match Self::decode::<Resource>(&key, &bytes) {
                Ok(resource) if resource.kind() == kind => resources.push(resource),
                Ok(resource) => warn!(
                    key = %display_key(&key),
                    found = %resource.kind(),
                    "stored resource kind does not match its key, skipping"
                ),
                Err(_) => continue,
            }
        }
        Ok(resources)
    }

    /// Resolves `name[:selector]` without masking.
    pub(crate) fn resolve(
        &self,
        kind: Kind,
        key: &str,
    ) -> Result<Resource> {
        let (name, selector) = parse_name_selector(key)?;
        let latest = self.latest(kind, name)?.ok_or_else(|| Error::missing(kind, name))?;

        let version = match selector {
            VersionSelector::Latest => return Ok(latest),
            VersionSelector::Version(v) => v,
            VersionSelector::Current | VersionSelector::Pending => {
                let pointer = latest.as_configuration().map_or(0, |c| {
                    if selector == VersionSelector::Current {
                        c.status.current_version
                    } else {
                        c.status.pending_version
                    }
                });
                if pointer == 0 {
                    return Err(Error::missing(kind, key));
                }
                pointer
            }
        };

        if version == latest.version() {
            return Ok(latest);
        }
        self.archived(kind, name, version)?.ok_or_else(|| Error::missing(kind, key))
    }

    pub(crate) fn load_agent(
        &self,
        id: &str,
    ) -> Result<Option<Agent>> {
        let key = agent_key(id);
        match self.agents.get(&key)? {
            Some(bytes) => Ok(Some(Self::decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn load_agents<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a String>,
    ) -> Result<Vec<Agent>> {
        let mut agents = Vec::new();
        for id in ids {
            if let Some(agent) = self.load_agent(id)? {
                agents.push(agent);
            }
        }
        Ok(agents)
    }

    fn rebuild_indexes(&self) -> Result<()> {
        let mut resources = Vec::new();
        for kind in Kind::ALL {
            resources.extend(self.scan_latest(kind)?);
        }
        self.configuration_index.rebuild(resources.iter());

        self.agent_index.clear();
        for item in self.agents.scan_prefix(agent_prefix()) {
            let (key, bytes) = item?;
            if let Ok(agent) = Self::decode::<Agent>(&key, &bytes) {
                self.agent_index.upsert(&agent);
            }
        }
        debug!(
            resources = resources.len(),
            agents = self.agent_index.len(),
            "indexes rebuilt"
        );
        Ok(())
    }

    // ---------------------------------------------------------------
    // Writes (callers hold the writer lock)

    pub(crate) fn commit(
        &self,
        writes: TreeWrites,
    ) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        (&self.resources, &self.archive, &self.agents).transaction(
            |(resources, archive, agents)| -> ConflictableTransactionResult<(), Error> {
                for (tree, entries) in [
                    (resources, &writes.resources),
                    (archive, &writes.archive),
                    (agents, &writes.agents),
                ] {
                    for (key, value) in entries {
                        match value {
                            Some(value) => {
                                tree.insert(key.as_slice(), value.as_slice())?;
                            }
                            None => {
                                tree.remove(key.as_slice())?;
                            }
                        }
                    }
                }
                Ok(())
            },
        )?;

        trace!(
            resources = writes.resources.len(),
            archive = writes.archive.len(),
            agents = writes.agents.len(),
            "transaction committed"
        );
        Ok(())
    }

    pub(crate) fn publish(
        &self,
        updates: EventUpdates,
    ) {
        if updates.is_empty() {
            return;
        }
        let delivered = self.updates.publish(updates);
        trace!(delivered, "update batch published");
    }

    /// Pins every unpinned reference to the latest version of its target.
    fn pin_references(
        &self,
        resource: &mut Resource,
    ) -> Result<()> {
        let mut failure: Option<Error> = None;
        resource.visit_references_mut(&mut |kind: Kind, reference: &mut String| {
            if failure.is_some() {
                return;
            }
            match self.pin(kind, reference) {
                Ok(Some(pinned)) => *reference = pinned,
                Ok(None) => {
                    failure = Some(Error::invalid(format!("{kind} {reference} not found")));
                }
                Err(e) => failure = Some(e),
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn pin(
        &self,
        kind: Kind,
        reference: &str,
    ) -> Result<Option<String>> {
        let parsed = ResourceRef::parse(reference)?;
        let Some(latest) = self.latest(kind, &parsed.name)? else {
            return Ok(None);
        };
        match parsed.version {
            None => Ok(Some(versioned_name(&parsed.name, latest.version()))),
            Some(v) if v == latest.version() => Ok(Some(reference.to_string())),
            Some(v) => Ok(self.archived(kind, &parsed.name, v)?.map(|_| reference.to_string())),
        }
    }

    fn type_definition(
        &self,
        kind: Kind,
        reference: &str,
    ) -> Result<Option<ResourceType>> {
        let parsed = ResourceRef::parse(reference)?;
        let resource = match parsed.version {
            Some(v) => self.version_of(kind, &parsed.name, v)?,
            None => self.latest(kind, &parsed.name)?,
        };
        Ok(resource.and_then(|r| r.as_resource_type().cloned()))
    }

    /// Validates, resolves and stores one resource.
    pub(crate) fn upsert_locked(
        &self,
        mut incoming: Resource,
    ) -> Result<Upserted> {
        let kind = incoming.kind();
        incoming.metadata().validate()?;
        let name = incoming.name().to_string();
        let prior = self.latest(kind, &name)?;

        if let Some(prior) = &prior {
            sensitive::restore(&mut incoming, prior);
        }
        self.pin_references(&mut incoming)?;
        sensitive::apply_type_definitions(&mut incoming, &|type_kind: Kind, reference: &str| {
            self.type_definition(type_kind, reference)
        })?;

        if let Some(prior) = &prior {
            if prior.canonical() == incoming.canonical() {
                trace!(%kind, %name, "resource unchanged");
                return Ok(Upserted {
                    status: UpdateStatus::Unchanged,
                    resource: prior.clone(),
                    updates: EventUpdates::new(),
                });
            }
        }

        let hash = incoming.spec_digest()?;
        let mut record = incoming;
        let mut writes = TreeWrites::default();

        let (status, event_type) = match &prior {
            None => {
                let metadata = record.metadata_mut();
                metadata.id = nanoid!();
                metadata.version = 1;
                if let Resource::Configuration(c) = &mut record {
                    c.status = ConfigurationStatus {
                        rollout: Rollout::new(self.default_rollout_options.clone()),
                        latest: true,
                        ..Default::default()
                    };
                }
                (UpdateStatus::Created, EventType::Insert)
            }
            Some(prior) => {
                let spec_changed = prior.spec_digest()? != hash;
                let bump = kind.is_versioned()
                    && spec_changed
                    && prior.as_configuration().map_or(true, Configuration::rollout_started);

                let metadata = record.metadata_mut();
                metadata.id = match prior.metadata().id.as_str() {
                    "" => nanoid!(),
                    id => id.to_string(),
                };
                metadata.version = if bump { prior.version() + 1 } else { prior.version() };

                if let Resource::Configuration(c) = &mut record {
                    let previous = prior.as_configuration().map(|p| p.status.clone()).unwrap_or_default();
                    c.status = if bump {
                        ConfigurationStatus {
                            rollout: Rollout::new(previous.rollout.options.clone()),
                            latest: true,
                            current_version: previous.current_version,
                            pending_version: previous.pending_version,
                        }
                    } else {
                        previous
                    };
                }

                if bump {
                    let mut archived = prior.clone();
                    if let Resource::Configuration(c) = &mut archived {
                        c.status.latest = false;
                    }
                    writes.put_archive(&archived)?;
                    debug!(%kind, %name, version = prior.version(), "archived previous version");
                }
                (UpdateStatus::Configured, EventType::Update)
            }
        };

        let metadata = record.metadata_mut();
        metadata.date_modified = timestamp_millis();
        metadata.hash = hash;

        writes.put_resource(&record)?;
        self.commit(writes)?;
        self.configuration_index.upsert(&record);

        let mut updates = EventUpdates::new();
        updates.include_resource(masked(record.clone()), event_type);
        DependencyUpdateTracker::expand(self, &mut updates)?;

        info!(%kind, %name, version = record.version(), %status, "resource applied");
        Ok(Upserted {
            status,
            resource: record,
            updates,
        })
    }

    /// Removes the live entry and its archive range.
    pub(crate) fn delete_locked(
        &self,
        kind: Kind,
        name: &str,
    ) -> Result<Option<(Resource, EventUpdates)>> {
        let Some(prior) = self.latest(kind, name)? else {
            return Ok(None);
        };

        let dependents = self.configuration_index.dependents(kind, name);
        if !dependents.is_empty() {
            return Err(ResourceError::InUse {
                kind,
                name: name.to_string(),
                dependents,
            }
            .into());
        }

        let mut writes = TreeWrites::default();
        writes.remove_resource(resource_key(kind, name));
        for key in self.archive.scan_prefix(archive_prefix(kind, name)).keys() {
            writes.remove_archive(key?.to_vec());
        }
        let archived = writes.archive.len();
        self.commit(writes)?;
        self.configuration_index.remove(kind, name);

        let mut updates = EventUpdates::new();
        updates.include_resource(masked(prior.clone()), EventType::Remove);

        info!(%kind, %name, archived, "resource deleted");
        Ok(Some((prior, updates)))
    }

    /// Re-applies the dependents recorded in `batch` after unpinning their
    /// references to resources changed in it, in Processor, Source,
    /// Destination, Configuration order. Dependents of dependents are
    /// already part of `batch`, so nothing is expanded further.
    pub fn update_dependent_resources(
        &self,
        batch: &EventUpdates,
    ) -> Result<Vec<ResourceStatus>> {
        let mut changed: HashSet<(Kind, String)> = HashSet::new();
        for kind in batch.changed_kinds() {
            if let Some(events) = batch.resources(kind) {
                for (_, event) in events.iter() {
                    changed.insert((kind, event.item.name().to_string()));
                }
            }
        }

        let mut dependents: Vec<(Kind, String)> =
            batch.transitive_updates().iter().map(|r| (r.kind(), r.name().to_string())).collect();
        dependents.sort_by_key(|(kind, _)| {
            Kind::DEPENDENT_ORDER.iter().position(|k| k == kind).unwrap_or(usize::MAX)
        });

        let mut statuses = Vec::new();
        let mut pending = EventUpdates::new();

        for (kind, name) in dependents {
            let outcome = {
                let _guard = self.writer.lock();
                match self.latest(kind, &name)? {
                    Some(mut resource) => {
                        unpin_changed(&mut resource, &changed);
                        Some(self.upsert_locked(resource))
                    }
                    None => None,
                }
            };

            match outcome {
                None => trace!(%kind, %name, "dependent vanished before re-apply"),
                Some(Ok(upserted)) => {
                    self.queue(&mut pending, upserted.updates);
                    statuses.push(ResourceStatus::new(masked(upserted.resource), upserted.status));
                }
                Some(Err(e)) if e.is_engine_failure() => {
                    self.publish(pending);
                    return Err(e);
                }
                Some(Err(e)) => {
                    warn!(%kind, %name, error = %e, "dependent resource could not be re-applied");
                    if let Some(resource) = self.latest(kind, &name)? {
                        statuses.push(ResourceStatus::with_reason(
                            masked(resource),
                            failure_status(&e),
                            e.to_string(),
                        ));
                    }
                }
            }
        }

        self.publish(pending);
        Ok(statuses)
    }

    /// Adds `updates` to the accumulated notification, publishing the
    /// accumulated one first when they conflict.
    pub(crate) fn queue(
        &self,
        pending: &mut EventUpdates,
        updates: EventUpdates,
    ) {
        if updates.is_empty() || pending.merge(&updates) {
            return;
        }
        let flushed = std::mem::replace(pending, updates);
        self.publish(flushed);
    }
}

impl ResourceSource for SledStore {
    fn latest_resources(
        &self,
        kind: Kind,
    ) -> Result<Vec<Resource>> {
        Ok(self.scan_latest(kind)?.into_iter().map(masked).collect())
    }
}

impl Store for SledStore {
    #[instrument(skip_all, fields(count = resources.len()))]
    fn apply_resources(
        &self,
        resources: Vec<Resource>,
    ) -> Result<Vec<ResourceStatus>> {
        let mut statuses = Vec::with_capacity(resources.len());
        let mut pending = EventUpdates::new();
        let mut follow_up = EventUpdates::new();
        let mut auto_start = Vec::new();

        for resource in resources {
            let kind = resource.kind();
            let outcome = {
                let _guard = self.writer.lock();
                self.upsert_locked(resource.clone())
            };

            match outcome {
                Ok(upserted) => {
                    RESOURCES_APPLIED.with_label_values(&[kind.as_str(), upserted.status.as_str()]).inc();
                    if starts_automatically(&upserted) {
                        auto_start.push(upserted.resource.name().to_string());
                    }
                    absorb_for_dependents(&mut follow_up, &upserted.updates);
                    self.queue(&mut pending, upserted.updates);
                    statuses.push(ResourceStatus::new(masked(upserted.resource), upserted.status));
                }
                Err(e) if e.is_engine_failure() => {
                    self.publish(pending);
                    return Err(e);
                }
                Err(e) => {
                    let status = failure_status(&e);
                    RESOURCES_APPLIED.with_label_values(&[kind.as_str(), status.as_str()]).inc();
                    warn!(%kind, name = resource.name(), error = %e, "resource not applied");
                    statuses.push(ResourceStatus::with_reason(masked(resource), status, e.to_string()));
                }
            }
        }

        self.publish(pending);

        if !follow_up.transitive_updates().is_empty() {
            let dependents = self.update_dependent_resources(&follow_up)?;
            debug!(count = dependents.len(), "dependent resources re-applied");
        }

        for name in auto_start {
            if let Err(e) = SledStore::start_rollout(self, &name, None) {
                warn!(%name, error = %e, "automatic rollout start failed");
            }
        }
        Ok(statuses)
    }

    #[instrument(skip_all, fields(count = resources.len()))]
    fn delete_resources(
        &self,
        resources: Vec<Resource>,
    ) -> Result<Vec<ResourceStatus>> {
        let mut statuses = Vec::with_capacity(resources.len());
        let mut pending = EventUpdates::new();

        for resource in resources {
            let kind = resource.kind();
            let outcome = {
                let _guard = self.writer.lock();
                self.delete_locked(kind, resource.name())
            };

            let status = match outcome {
                Ok(Some((deleted, updates))) => {
                    self.queue(&mut pending, updates);
                    ResourceStatus::new(masked(deleted), UpdateStatus::Deleted)
                }
                Ok(None) => {
                    ResourceStatus::with_reason(masked(resource), UpdateStatus::Unchanged, "not found")
                }
                Err(e) if e.is_engine_failure() => {
                    self.publish(pending);
                    return Err(e);
                }
                Err(e) => {
                    warn!(%kind, name = resource.name(), error = %e, "resource not deleted");
                    ResourceStatus::with_reason(masked(resource), failure_status(&e), e.to_string())
                }
            };
            RESOURCES_APPLIED.with_label_values(&[kind.as_str(), status.status.as_str()]).inc();
            statuses.push(status);
        }

        self.publish(pending);
        Ok(statuses)
    }

    fn resource(
        &self,
        kind: Kind,
        key: &str,
    ) -> Result<Resource> {
        self.resolve(kind, key).map(masked)
    }

    fn resources(
        &self,
        kind: Kind,
    ) -> Result<Vec<Resource>> {
        self.list(kind, |_| true)
    }

    fn delete_resource(
        &self,
        kind: Kind,
        name: &str,
    ) -> Result<Option<Resource>> {
        let outcome = {
            let _guard = self.writer.lock();
            self.delete_locked(kind, name)?
        };
        Ok(outcome.map(|(deleted, updates)| {
            self.publish(updates);
            masked(deleted)
        }))
    }

    fn resource_history(
        &self,
        kind: Kind,
        name: &str,
    ) -> Result<Vec<Resource>> {
        let Some(latest) = self.latest(kind, name)? else {
            return Ok(Vec::new());
        };
        let mut history = self.archive_entries(kind, name)?;
        history.push(latest);
        history.reverse();
        Ok(history.into_iter().map(masked).collect())
    }

    fn agent(
        &self,
        id: &str,
    ) -> Result<Option<Agent>> {
        self.load_agent(id)
    }

    fn agents(
        &self,
        selector: &Labels,
    ) -> Result<Vec<Agent>> {
        let ids = self.agent_index.select(selector);
        self.load_agents(ids.iter())
    }

    fn replace_agents(
        &self,
        agents: Vec<Agent>,
    ) -> Result<Vec<Agent>> {
        let ids: Vec<String> = agents.iter().map(|a| a.id.clone()).collect();
        SledStore::upsert_agents(self, &ids, |agent| {
            if let Some(incoming) = agents.iter().rev().find(|a| a.id == agent.id) {
                *agent = incoming.clone();
            }
        })
    }

    #[instrument(skip(self))]
    fn delete_agents(
        &self,
        ids: Vec<String>,
    ) -> Result<Vec<Agent>> {
        let (deleted, updates) = {
            let _guard = self.writer.lock();
            let mut writes = TreeWrites::default();
            let mut updates = EventUpdates::new();
            let mut deleted = Vec::new();
            let mut seen = BTreeSet::new();

            for id in ids.iter().filter(|id| seen.insert(id.as_str())) {
                if let Some(agent) = self.load_agent(id)? {
                    writes.remove_agent(agent_key(id));
                    updates.include_agent(agent.clone(), EventType::Remove);
                    deleted.push(agent);
                }
            }
            self.commit(writes)?;
            for agent in &deleted {
                self.agent_index.remove(&agent.id);
            }
            (deleted, updates)
        };

        self.publish(updates);
        Ok(deleted)
    }

    fn start_rollout(
        &self,
        key: &str,
        options: Option<RolloutOptions>,
    ) -> Result<Configuration> {
        SledStore::start_rollout(self, key, options)
    }

    fn pause_rollout(
        &self,
        key: &str,
    ) -> Result<Configuration> {
        SledStore::pause_rollout(self, key)
    }

    fn resume_rollout(
        &self,
        key: &str,
    ) -> Result<Configuration> {
        SledStore::resume_rollout(self, key)
    }

    fn update_rollout(
        &self,
        name: &str,
    ) -> Result<Configuration> {
        SledStore::update_rollout(self, name)
    }

    fn update_rollouts(&self) -> (Vec<Configuration>, Vec<Error>) {
        SledStore::update_rollouts(self)
    }
}

/// Per-item status for a failure that does not abort the batch.
fn failure_status(e: &Error) -> UpdateStatus {
    if e.is_invalid() || e.is_missing() {
        UpdateStatus::Invalid
    } else if e.is_in_use() {
        UpdateStatus::InUse
    } else {
        UpdateStatus::Error
    }
}

/// A created or changed configuration whose options ask for the rollout to
/// begin without an explicit start.
fn starts_automatically(upserted: &Upserted) -> bool {
    matches!(upserted.status, UpdateStatus::Created | UpdateStatus::Configured)
        && upserted.resource.as_configuration().is_some_and(|c| {
            c.rollout_status() == RolloutStatus::Pending && c.status.rollout.options.start_automatically
        })
}

fn agent_event_type(
    prior: Option<&Agent>,
    agent: &Agent,
) -> EventType {
    let Some(prior) = prior else {
        return EventType::Insert;
    };

    let mut labels_only = prior.clone();
    labels_only.labels = agent.labels.clone();
    if labels_only == *agent {
        return EventType::Label;
    }

    let mut rollout_only = prior.clone();
    rollout_only.configuration_status = agent.configuration_status.clone();
    if rollout_only == *agent {
        return EventType::Rollout;
    }
    EventType::Update
}

/// Strips the version from references to resources changed in this batch
/// so they resolve to the new latest.
fn unpin_changed(
    resource: &mut Resource,
    changed: &HashSet<(Kind, String)>,
) {
    resource.visit_references_mut(&mut |kind: Kind, reference: &mut String| {
        if let Ok(parsed) = ResourceRef::parse(reference.as_str()) {
            if parsed.version.is_some() && changed.contains(&(kind, parsed.name.clone())) {
                *reference = parsed.name;
            }
        }
    });
}

/// Collects changed keys and transitive dependents across a whole call,
/// regardless of notification conflicts.
fn absorb_for_dependents(
    follow_up: &mut EventUpdates,
    updates: &EventUpdates,
) {
    for kind in updates.changed_kinds() {
        if let Some(events) = updates.resources(kind) {
            for (_, event) in events.iter() {
                follow_up.include_resource(event.item.clone(), event.event_type);
            }
        }
    }
    for resource in updates.transitive_updates() {
        follow_up.add_transitive_update(resource.clone());
    }
}
