//! Reverse-dependency map: for every `(kind, name)`, the resources that
//! reference it. Delete consults it to refuse removing resources in use.

use std::collections::BTreeSet;

use dashmap::DashMap;
use tracing::trace;

use crate::errors::Dependent;
use crate::Kind;
use crate::Resource;

type Key = (Kind, String);

#[derive(Debug, Default)]
pub struct ConfigurationIndex {
    dependents: DashMap<Key, BTreeSet<Dependent>>,
    /// Edges recorded for each resource, so updates can drop stale ones
    references: DashMap<Key, Vec<Key>>,
}

impl ConfigurationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the edges of `resource` with its current references.
    pub fn upsert(
        &self,
        resource: &Resource,
    ) {
        let kind = resource.kind();
        let name = resource.name().to_string();
        self.remove(kind, &name);

        let mut targets: Vec<Key> = resource
            .dependencies()
            .into_iter()
            .map(|d| (d.kind, d.reference.name))
            .collect();
        targets.sort();
        targets.dedup();

        for target in &targets {
            self.dependents.entry(target.clone()).or_default().insert(Dependent {
                kind,
                name: name.clone(),
            });
        }
        trace!(%kind, %name, edges = targets.len(), "indexed references");
        self.references.insert((kind, name), targets);
    }

    pub fn remove(
        &self,
        kind: Kind,
        name: &str,
    ) {
        let Some((_, targets)) = self.references.remove(&(kind, name.to_string())) else {
            return;
        };
        let dependent = Dependent {
            kind,
            name: name.to_string(),
        };
        for target in targets {
            let now_empty = match self.dependents.get_mut(&target) {
                Some(mut set) => {
                    set.remove(&dependent);
                    set.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.dependents.remove_if(&target, |_, set| set.is_empty());
            }
        }
    }

    /// Resources referencing `(kind, name)`, sorted by kind then name.
    pub fn dependents(
        &self,
        kind: Kind,
        name: &str,
    ) -> Vec<Dependent> {
        self.dependents
            .get(&(kind, name.to_string()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.dependents.clear();
        self.references.clear();
    }

    pub fn rebuild<'a>(
        &self,
        resources: impl IntoIterator<Item = &'a Resource>,
    ) {
        self.clear();
        for resource in resources {
            self.upsert(resource);
        }
    }
}
