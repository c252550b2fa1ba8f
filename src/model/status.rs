use std::fmt;

use super::Resource;

/// Outcome of applying or deleting one resource in a batch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateStatus {
    Created,
    Configured,
    Unchanged,
    Deleted,
    Invalid,
    InUse,
    Error,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Created => "created",
            UpdateStatus::Configured => "configured",
            UpdateStatus::Unchanged => "unchanged",
            UpdateStatus::Deleted => "deleted",
            UpdateStatus::Invalid => "invalid",
            UpdateStatus::InUse => "in-use",
            UpdateStatus::Error => "error",
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceStatus {
    pub resource: Resource,
    pub status: UpdateStatus,
    /// Human-readable reason for Invalid, InUse and Error outcomes
    pub reason: String,
}

impl ResourceStatus {
    pub fn new(
        resource: Resource,
        status: UpdateStatus,
    ) -> Self {
        Self {
            resource,
            status,
            reason: String::new(),
        }
    }

    pub fn with_reason(
        resource: Resource,
        status: UpdateStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            status,
            reason: reason.into(),
        }
    }
}
