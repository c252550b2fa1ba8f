use serde::Deserialize;
use serde::Serialize;

use super::Labels;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    #[default]
    Disconnected,
    Connected,
    Error,
    ComponentFailed,
    Deleted,
    Configuring,
}

/// Configuration references tracked for an agent, each `name:version` or empty.
///
/// `current` is what the agent runs, `pending` what it has been told to
/// apply, `future` what it will be told once its rollout phase arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfigurationStatus {
    pub current: String,
    pub pending: String,
    pub future: String,
}

impl AgentConfigurationStatus {
    /// Every non-empty reference, in current, pending, future order.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        [self.current.as_str(), self.pending.as_str(), self.future.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
    }
}

/// Where an agent stands in the rollout of one `name:version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRolloutState {
    Complete,
    Error,
    Pending,
    Waiting,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub labels: Labels,
    pub version: String,
    pub configuration_status: AgentConfigurationStatus,
    pub status: AgentStatus,
    pub error_message: String,
    /// Unix epoch milliseconds
    pub reported_at: Option<u64>,
    pub disconnected_at: Option<u64>,
}

impl Agent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_labels<K, V>(
        mut self,
        labels: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.labels = labels.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Label selector match: every selector pair must be present.
    pub fn matches(
        &self,
        match_labels: &Labels,
    ) -> bool {
        match_labels.iter().all(|(k, v)| self.labels.get(k) == Some(v))
    }

    pub fn rollout_state(
        &self,
        reference: &str,
    ) -> Option<AgentRolloutState> {
        let status = &self.configuration_status;
        if status.pending == reference {
            if self.status == AgentStatus::Error {
                Some(AgentRolloutState::Error)
            } else {
                Some(AgentRolloutState::Pending)
            }
        } else if status.future == reference {
            Some(AgentRolloutState::Waiting)
        } else if status.current == reference && status.pending.is_empty() {
            Some(AgentRolloutState::Complete)
        } else {
            None
        }
    }

    /// Moves a waiting agent into the pending set of its future reference.
    pub(crate) fn promote_future(&mut self) {
        let future = std::mem::take(&mut self.configuration_status.future);
        if !future.is_empty() {
            self.configuration_status.pending = future;
        }
    }
}
