use std::collections::BTreeMap;

use super::*;
use crate::Component;
use crate::Configuration;
use crate::Kind;
use crate::Resource;
use crate::ResourceConfiguration;
use crate::ResourceType;
use crate::Result;

#[derive(Default)]
struct FakeSource {
    resources: BTreeMap<Kind, Vec<Resource>>,
}

impl FakeSource {
    fn with(
        mut self,
        resource: Resource,
    ) -> Self {
        self.resources.entry(resource.kind()).or_default().push(resource);
        self
    }
}

impl ResourceSource for FakeSource {
    fn latest_resources(
        &self,
        kind: Kind,
    ) -> Result<Vec<Resource>> {
        Ok(self.resources.get(&kind).cloned().unwrap_or_default())
    }
}

fn fixture() -> FakeSource {
    FakeSource::default()
        .with(Resource::SourceType(ResourceType::new("macos")))
        .with(Resource::Source(Component::new("s1", "macos:1")))
        .with(Resource::Source(Component::new("s2", "windows:1")))
        .with(Resource::Processor(Component::new("p1", "batch:1")))
        .with(Resource::Configuration(
            Configuration::new("c1").with_source(ResourceConfiguration::named("s1:1")),
        ))
        .with(Resource::Configuration(
            Configuration::new("c2").with_source(ResourceConfiguration::named("s2:1")),
        ))
}

#[test]
fn expand_should_follow_references_transitively() {
    let source = fixture();
    let mut updates = EventUpdates::new();
    updates.include_resource(Resource::SourceType(ResourceType::new("macos")), EventType::Update);

    let added = DependencyUpdateTracker::expand(&source, &mut updates).unwrap();

    assert_eq!(added, 2);
    assert!(updates.contains_resource_event(Kind::Source, "s1", EventType::Update));
    assert!(updates.contains_resource_event(Kind::Configuration, "c1", EventType::Update));
    assert!(!updates.contains_resource(Kind::Source, "s2"));
    assert!(!updates.contains_resource(Kind::Configuration, "c2"));

    let transitive: Vec<_> = updates.transitive_updates().iter().map(|r| (r.kind(), r.name())).collect();
    assert_eq!(transitive, vec![(Kind::Source, "s1"), (Kind::Configuration, "c1")]);
}

#[test]
fn expand_should_skip_unrelated_kinds() {
    let source = fixture();
    let mut updates = EventUpdates::new();
    updates.include_resource(Resource::Configuration(Configuration::new("c9")), EventType::Insert);

    assert_eq!(DependencyUpdateTracker::expand(&source, &mut updates).unwrap(), 0);
    assert_eq!(updates.size(), 1);
}

#[test]
fn expand_should_not_duplicate_direct_changes() {
    let source = fixture();
    let mut updates = EventUpdates::new();
    updates.include_resource(Resource::SourceType(ResourceType::new("macos")), EventType::Update);
    updates.include_resource(
        Resource::Configuration(Configuration::new("c1")),
        EventType::Update,
    );

    let added = DependencyUpdateTracker::expand(&source, &mut updates).unwrap();
    assert_eq!(added, 1);
    assert_eq!(updates.transitive_updates().len(), 1);
    assert_eq!(updates.transitive_updates()[0].name(), "s1");
}
