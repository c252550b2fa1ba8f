//! In-memory search index over agents.
//!
//! Every agent is indexed by its labels and by synthetic fields derived from
//! its configuration status, so rollout planning can find the agents of one
//! `name:version` without scanning the agents tree:
//!
//! | field                   | value                                   |
//! |-------------------------|-----------------------------------------|
//! | `configuration-current` | current reference                       |
//! | `configuration-pending` | pending reference                       |
//! | `configuration-future`  | future reference                        |
//! | `rollout-complete`      | current reference, when nothing pending |
//! | `rollout-error`         | pending reference, when agent errored   |
//! | `rollout-pending`       | pending reference, otherwise            |
//! | `rollout-waiting`       | future reference                        |
//!
//! Results are always in lexicographic agent-id order.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use parking_lot::RwLock;

use crate::constants::FIELD_CONFIGURATION_CURRENT;
use crate::constants::FIELD_CONFIGURATION_FUTURE;
use crate::constants::FIELD_CONFIGURATION_PENDING;
use crate::constants::FIELD_ROLLOUT_COMPLETE;
use crate::constants::FIELD_ROLLOUT_ERROR;
use crate::constants::FIELD_ROLLOUT_PENDING;
use crate::constants::FIELD_ROLLOUT_WAITING;
use crate::Agent;
use crate::AgentStatus;
use crate::Error;
use crate::Labels;
use crate::Result;
use crate::RolloutProgress;

/// Conjunction of `field=value` terms. Fields are label keys or synthetic
/// fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    terms: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_term(
        mut self,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.terms.push((field.into(), value.into()));
        self
    }

    /// Parses whitespace separated `field=value` terms.
    pub fn parse(s: &str) -> Result<Self> {
        let mut query = Query::new();
        for term in s.split_whitespace() {
            let Some((field, value)) = term.split_once('=') else {
                return Err(Error::invalid(format!("query term {term} is not field=value")));
            };
            if field.is_empty() {
                return Err(Error::invalid(format!("query term {term} has no field")));
            }
            query = query.with_term(field, value);
        }
        Ok(query)
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct AgentDocument {
    fields: BTreeMap<String, String>,
}

impl AgentDocument {
    fn from_agent(agent: &Agent) -> Self {
        let mut fields = agent.labels.clone();
        let status = &agent.configuration_status;

        let mut set = |field: &str, value: &str| {
            if !value.is_empty() {
                fields.insert(field.to_string(), value.to_string());
            }
        };

        set(FIELD_CONFIGURATION_CURRENT, &status.current);
        set(FIELD_CONFIGURATION_PENDING, &status.pending);
        set(FIELD_CONFIGURATION_FUTURE, &status.future);
        set(FIELD_ROLLOUT_WAITING, &status.future);
        if status.pending.is_empty() {
            set(FIELD_ROLLOUT_COMPLETE, &status.current);
        } else if agent.status == AgentStatus::Error {
            set(FIELD_ROLLOUT_ERROR, &status.pending);
        } else {
            set(FIELD_ROLLOUT_PENDING, &status.pending);
        }

        Self { fields }
    }

    fn matches(
        &self,
        terms: &[(String, String)],
    ) -> bool {
        terms.iter().all(|(field, value)| self.fields.get(field) == Some(value))
    }
}

#[derive(Debug, Default)]
pub struct AgentIndex {
    documents: RwLock<BTreeMap<String, AgentDocument>>,
}

impl AgentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    pub fn upsert(
        &self,
        agent: &Agent,
    ) {
        self.documents.write().insert(agent.id.clone(), AgentDocument::from_agent(agent));
    }

    pub fn remove(
        &self,
        id: &str,
    ) {
        self.documents.write().remove(id);
    }

    pub fn clear(&self) {
        self.documents.write().clear();
    }

    /// IDs of agents whose labels contain every selector pair.
    pub fn select(
        &self,
        match_labels: &Labels,
    ) -> Vec<String> {
        let terms: Vec<(String, String)> =
            match_labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        self.matching(&terms)
    }

    pub fn search(
        &self,
        query: &Query,
    ) -> Vec<String> {
        self.matching(&query.terms)
    }

    /// Distinct values of `field` starting with `prefix`, sorted.
    pub fn suggestions(
        &self,
        field: &str,
        prefix: &str,
    ) -> Vec<String> {
        let documents = self.documents.read();
        let values: BTreeSet<&String> = documents
            .values()
            .filter_map(|d| d.fields.get(field))
            .filter(|v| v.starts_with(prefix))
            .collect();
        values.into_iter().cloned().collect()
    }

    /// Counts agents in each rollout state of `reference`.
    pub fn rollout_progress(
        &self,
        reference: &str,
    ) -> RolloutProgress {
        let documents = self.documents.read();
        let count = |field: &str| {
            documents
                .values()
                .filter(|d| d.fields.get(field).is_some_and(|v| v == reference))
                .count() as u64
        };
        RolloutProgress {
            completed: count(FIELD_ROLLOUT_COMPLETE),
            errors: count(FIELD_ROLLOUT_ERROR),
            pending: count(FIELD_ROLLOUT_PENDING),
            waiting: count(FIELD_ROLLOUT_WAITING),
        }
    }

    /// IDs of agents whose pending or future reference is `reference`.
    pub fn enrolled(
        &self,
        reference: &str,
    ) -> Vec<String> {
        let documents = self.documents.read();
        documents
            .iter()
            .filter(|(_, d)| {
                d.fields.get(FIELD_CONFIGURATION_PENDING).is_some_and(|v| v == reference)
                    || d.fields.get(FIELD_CONFIGURATION_FUTURE).is_some_and(|v| v == reference)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn matching(
        &self,
        terms: &[(String, String)],
    ) -> Vec<String> {
        self.documents
            .read()
            .iter()
            .filter(|(_, d)| d.matches(terms))
            .map(|(id, _)| id.clone())
            .collect()
    }
}
