#[cfg(test)]
use mockall::automock;

use crate::Agent;
use crate::Configuration;
use crate::Error;
use crate::Kind;
use crate::Labels;
use crate::Resource;
use crate::ResourceStatus;
use crate::Result;
use crate::RolloutOptions;

/// Public operations of the control-plane store.
///
/// Resource reads mask sensitive parameters. Lookup keys accept
/// `name[:selector]` where the selector is `latest`, `current`, `pending`
/// or a version number.
#[cfg_attr(test, automock)]
pub trait Store: Send + Sync + 'static {
    /// Creates or updates every resource; per-item failures become statuses.
    fn apply_resources(
        &self,
        resources: Vec<Resource>,
    ) -> Result<Vec<ResourceStatus>>;

    /// Deletes every resource; resources still referenced come back `InUse`.
    fn delete_resources(
        &self,
        resources: Vec<Resource>,
    ) -> Result<Vec<ResourceStatus>>;

    fn resource(
        &self,
        kind: Kind,
        key: &str,
    ) -> Result<Resource>;

    /// Latest version of every resource of `kind`, sorted by name.
    fn resources(
        &self,
        kind: Kind,
    ) -> Result<Vec<Resource>>;

    /// Removes the resource and its history; None when it did not exist.
    fn delete_resource(
        &self,
        kind: Kind,
        name: &str,
    ) -> Result<Option<Resource>>;

    /// Every stored version, newest first.
    fn resource_history(
        &self,
        kind: Kind,
        name: &str,
    ) -> Result<Vec<Resource>>;

    fn agent(
        &self,
        id: &str,
    ) -> Result<Option<Agent>>;

    /// Agents matching every selector pair, sorted by id.
    fn agents(
        &self,
        selector: &Labels,
    ) -> Result<Vec<Agent>>;

    /// Stores the given agent records; returns the ones that changed.
    fn replace_agents(
        &self,
        agents: Vec<Agent>,
    ) -> Result<Vec<Agent>>;

    fn delete_agents(
        &self,
        ids: Vec<String>,
    ) -> Result<Vec<Agent>>;

    fn start_rollout(
        &self,
        key: &str,
        options: Option<RolloutOptions>,
    ) -> Result<Configuration>;

    fn pause_rollout(
        &self,
        key: &str,
    ) -> Result<Configuration>;

    fn resume_rollout(
        &self,
        key: &str,
    ) -> Result<Configuration>;

    /// Recomputes the rollout of the named configuration.
    fn update_rollout(
        &self,
        name: &str,
    ) -> Result<Configuration>;

    /// Recomputes every rollout in progress, continuing past failures.
    fn update_rollouts(&self) -> (Vec<Configuration>, Vec<Error>);
}
