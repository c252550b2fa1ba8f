//! Transitive expansion of update batches.
//!
//! A directly changed resource can invalidate resources that reference it.
//! Each changed kind implies a fixed set of downstream kinds
//! ([`Kind::could_affect`]); every implied kind is listed once, in
//! [`Kind::DEPENDENT_ORDER`], and resources referencing anything already in
//! the batch are added as `Update` events and recorded as transitive updates.
//! Visiting kinds in that order makes a single pass transitive: a source
//! added because of its type is already in the batch when configurations are
//! checked.

use std::collections::BTreeSet;
use std::collections::HashSet;

use tracing::debug;
use tracing::trace;

use super::EventType;
use super::EventUpdates;
use crate::Kind;
use crate::Resource;
use crate::Result;

/// Latest-version listing used to find dependents.
pub trait ResourceSource {
    fn latest_resources(
        &self,
        kind: Kind,
    ) -> Result<Vec<Resource>>;
}

pub struct DependencyUpdateTracker;

impl DependencyUpdateTracker {
    /// Adds every resource depending on a resource in `updates`. Returns the
    /// number of resources added.
    pub fn expand<S>(
        source: &S,
        updates: &mut EventUpdates,
    ) -> Result<usize>
    where
        S: ResourceSource + ?Sized,
    {
        let mut changed: HashSet<(Kind, String)> = HashSet::new();
        let mut implied: BTreeSet<Kind> = BTreeSet::new();

        for kind in updates.changed_kinds().collect::<Vec<_>>() {
            if let Some(events) = updates.resources(kind) {
                for (name, _) in events.iter() {
                    changed.insert((kind, name.clone()));
                }
            }
            implied.extend(kind.could_affect().iter().copied());
        }

        let mut added = 0;
        for kind in Kind::DEPENDENT_ORDER {
            if !implied.contains(&kind) {
                continue;
            }

            let candidates = source.latest_resources(kind)?;
            trace!(%kind, candidates = candidates.len(), "checking dependents");

            for resource in candidates {
                if updates.contains_resource(kind, resource.name()) {
                    continue;
                }
                let depends = resource
                    .dependencies()
                    .iter()
                    .any(|d| changed.contains(&(d.kind, d.reference.name.clone())));
                if !depends {
                    continue;
                }

                debug!(%kind, name = resource.name(), "including dependent resource");
                changed.insert((kind, resource.name().to_string()));
                implied.extend(kind.could_affect().iter().copied());
                updates.add_transitive_update(resource.clone());
                updates.include_resource(resource, EventType::Update);
                added += 1;
            }
        }

        Ok(added)
    }
}
