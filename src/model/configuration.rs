use serde::Deserialize;
use serde::Serialize;

use super::versioned_name;
use super::Labels;
use super::Metadata;
use super::ResourceConfiguration;
use super::Rollout;
use super::RolloutStatus;

/// Agents whose labels contain every `match_labels` pair run the configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSelector {
    pub match_labels: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSpec {
    pub selector: AgentSelector,
    pub sources: Vec<ResourceConfiguration>,
    pub destinations: Vec<ResourceConfiguration>,
    /// Raw collector configuration, used instead of sources/destinations when set
    pub raw: String,
}

/// Status of one configuration version.
///
/// `current_version` and `pending_version` are only meaningful on the latest
/// record (`latest == true`); archived versions keep whatever they had.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationStatus {
    pub rollout: Rollout,
    pub latest: bool,
    pub current_version: u64,
    pub pending_version: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub metadata: Metadata,
    pub spec: ConfigurationSpec,
    pub status: ConfigurationStatus,
}

impl Configuration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: Metadata::new(name),
            ..Default::default()
        }
    }

    pub fn with_selector<K, V>(
        mut self,
        labels: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.spec.selector.match_labels =
            labels.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    pub fn with_source(
        mut self,
        source: ResourceConfiguration,
    ) -> Self {
        self.spec.sources.push(source);
        self
    }

    pub fn with_destination(
        mut self,
        destination: ResourceConfiguration,
    ) -> Self {
        self.spec.destinations.push(destination);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> u64 {
        self.metadata.version
    }

    /// `name:version` reference agents carry for this configuration version.
    pub fn reference(&self) -> String {
        versioned_name(&self.metadata.name, self.metadata.version)
    }

    pub fn rollout_status(&self) -> RolloutStatus {
        self.status.rollout.status
    }

    /// Versions only bump once the rollout of the latest version has begun.
    pub(crate) fn rollout_started(&self) -> bool {
        self.status.rollout.status != RolloutStatus::Pending
    }
}
