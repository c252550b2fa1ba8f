use super::*;
use crate::Agent;
use crate::Component;
use crate::Kind;
use crate::Resource;

fn source(name: &str) -> Resource {
    Resource::Source(Component::new(name, "macos"))
}

#[test]
fn merge_should_union_disjoint_batches() {
    let mut a = EventUpdates::new();
    a.include_resource(source("s1"), EventType::Insert);

    let mut b = EventUpdates::new();
    b.include_resource(source("s2"), EventType::Update);
    b.include_agent(Agent::new("a1"), EventType::Label);

    assert!(a.merge(&b));
    assert_eq!(a.size(), 3);
    assert!(a.contains_resource_event(Kind::Source, "s2", EventType::Update));
    assert!(a.agents().contains("a1", EventType::Label));
}

#[test]
fn merge_should_accept_same_key_same_event_type() {
    let mut a = EventUpdates::new();
    a.include_resource(source("s1"), EventType::Update);
    let mut b = EventUpdates::new();
    b.include_resource(source("s1"), EventType::Update);

    assert!(a.merge(&b));
    assert_eq!(a.size(), 1);
}

#[test]
fn merge_should_refuse_conflicting_event_types_without_mutating() {
    let mut a = EventUpdates::new();
    a.include_resource(source("s1"), EventType::Insert);
    a.include_resource(source("s0"), EventType::Update);
    let before = a.clone();

    let mut b = EventUpdates::new();
    b.include_resource(source("s9"), EventType::Insert);
    b.include_resource(source("s1"), EventType::Remove);

    assert!(!a.can_merge(&b));
    assert!(!a.merge(&b));
    assert_eq!(a, before);
}

#[test]
fn agent_conflicts_should_block_merge() {
    let mut a = EventUpdates::new();
    a.include_agent(Agent::new("a1"), EventType::Insert);
    let mut b = EventUpdates::new();
    b.include_agent(Agent::new("a1"), EventType::Rollout);

    assert!(!a.merge(&b));
}

#[test]
fn transitive_updates_should_be_deduplicated() {
    let mut updates = EventUpdates::new();
    updates.add_transitive_update(source("s1"));
    updates.add_transitive_update(source("s1"));

    let mut other = EventUpdates::new();
    other.add_transitive_update(source("s1"));
    other.add_transitive_update(source("s2"));

    assert!(updates.merge(&other));
    assert_eq!(updates.transitive_updates().len(), 2);
}

#[test]
fn archived_configuration_versions_are_keyed_by_reference() {
    let mut latest = crate::Configuration::new("cfg");
    latest.metadata.version = 2;
    latest.status.latest = true;
    let mut archived = crate::Configuration::new("cfg");
    archived.metadata.version = 1;

    let mut updates = EventUpdates::new();
    updates.include_resource(Resource::Configuration(latest), EventType::Rollout);
    updates.include_archived_configuration(archived, EventType::Rollout);

    let events = updates.resources(Kind::Configuration).unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.get("cfg").is_some());
    assert!(events.get("cfg:1").is_some());
}

#[test]
fn configurations_built_outside_the_store_are_keyed_by_name() {
    let mut updates = EventUpdates::new();
    updates.include_resource(Resource::Configuration(crate::Configuration::new("c1")), EventType::Update);

    assert!(updates.contains_resource(Kind::Configuration, "c1"));
    assert!(updates.contains_resource_event(Kind::Configuration, "c1", EventType::Update));
    assert!(!updates.contains_resource(Kind::Configuration, "c1:0"));
}
