//! Update batches handed to subscribers after a store mutation.

use std::collections::BTreeMap;

use super::Mergeable;
use crate::Agent;
use crate::Configuration;
use crate::Kind;
use crate::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Insert,
    Update,
    Remove,
    /// Only labels changed
    Label,
    /// Only rollout state changed
    Rollout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
    pub item: T,
    pub event_type: EventType,
}

/// Events for one kind, keyed by the item's unique key (name or agent id).
#[derive(Debug, Clone, PartialEq)]
pub struct Events<T> {
    entries: BTreeMap<String, Event<T>>,
}

impl<T> Default for Events<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: Clone> Events<T> {
    pub fn get(
        &self,
        key: &str,
    ) -> Option<&Event<T>> {
        self.entries.get(key)
    }

    pub fn contains(
        &self,
        key: &str,
        event_type: EventType,
    ) -> bool {
        self.entries.get(key).is_some_and(|e| e.event_type == event_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Event<T>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(
        &mut self,
        key: String,
        item: T,
        event_type: EventType,
    ) {
        self.entries.insert(key, Event { item, event_type });
    }

    fn conflicts_with(
        &self,
        other: &Events<T>,
    ) -> bool {
        other
            .entries
            .iter()
            .any(|(key, event)| self.entries.get(key).is_some_and(|e| e.event_type != event.event_type))
    }

    fn absorb(
        &mut self,
        other: &Events<T>,
    ) {
        for (key, event) in &other.entries {
            self.entries.insert(key.clone(), event.clone());
        }
    }
}

/// One notification: per-kind events plus resources included only because
/// they depend on a directly changed resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventUpdates {
    agents: Events<Agent>,
    resources: BTreeMap<Kind, Events<Resource>>,
    transitive_updates: Vec<Resource>,
}

impl EventUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include_resource(
        &mut self,
        resource: Resource,
        event_type: EventType,
    ) {
        let key = resource.name().to_string();
        self.resources.entry(resource.kind()).or_default().insert(key, resource, event_type);
    }

    /// Event for a configuration version that is no longer the latest,
    /// keyed by `name:version` so it never collides with the latest entry.
    pub fn include_archived_configuration(
        &mut self,
        configuration: Configuration,
        event_type: EventType,
    ) {
        let key = configuration.reference();
        self.resources
            .entry(Kind::Configuration)
            .or_default()
            .insert(key, Resource::Configuration(configuration), event_type);
    }

    pub fn include_agent(
        &mut self,
        agent: Agent,
        event_type: EventType,
    ) {
        let key = agent.id.clone();
        self.agents.insert(key, agent, event_type);
    }

    /// Records a dependent resource that must be re-applied downstream.
    pub fn add_transitive_update(
        &mut self,
        resource: Resource,
    ) {
        let duplicate = self
            .transitive_updates
            .iter()
            .any(|r| r.kind() == resource.kind() && r.name() == resource.name());
        if !duplicate {
            self.transitive_updates.push(resource);
        }
    }

    pub fn agents(&self) -> &Events<Agent> {
        &self.agents
    }

    pub fn resources(
        &self,
        kind: Kind,
    ) -> Option<&Events<Resource>> {
        self.resources.get(&kind)
    }

    pub fn contains_resource(
        &self,
        kind: Kind,
        name: &str,
    ) -> bool {
        self.resources.get(&kind).is_some_and(|events| events.get(name).is_some())
    }

    pub fn contains_resource_event(
        &self,
        kind: Kind,
        name: &str,
        event_type: EventType,
    ) -> bool {
        self.resources.get(&kind).is_some_and(|events| events.contains(name, event_type))
    }

    /// Kinds with at least one resource event.
    pub fn changed_kinds(&self) -> impl Iterator<Item = Kind> + '_ {
        self.resources.iter().filter(|(_, e)| !e.is_empty()).map(|(k, _)| *k)
    }

    pub fn transitive_updates(&self) -> &[Resource] {
        &self.transitive_updates
    }

    pub fn size(&self) -> usize {
        self.agents.len() + self.resources.values().map(Events::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// True when no key shared by both batches carries different event types.
    pub fn can_merge(
        &self,
        other: &EventUpdates,
    ) -> bool {
        if self.agents.conflicts_with(&other.agents) {
            return false;
        }
        !other.resources.iter().any(|(kind, events)| {
            self.resources.get(kind).is_some_and(|mine| mine.conflicts_with(events))
        })
    }

    /// Merges `other` into `self`. Returns false and leaves both batches
    /// untouched when they conflict.
    pub fn merge(
        &mut self,
        other: &EventUpdates,
    ) -> bool {
        if !self.can_merge(other) {
            return false;
        }
        self.agents.absorb(&other.agents);
        for (kind, events) in &other.resources {
            self.resources.entry(*kind).or_default().absorb(events);
        }
        for resource in &other.transitive_updates {
            self.add_transitive_update(resource.clone());
        }
        true
    }
}

impl Mergeable for EventUpdates {
    fn merge(
        &mut self,
        other: &Self,
    ) -> bool {
        EventUpdates::merge(self, other)
    }

    fn size(&self) -> usize {
        EventUpdates::size(self)
    }
}
