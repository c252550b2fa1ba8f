//! Control Plane Error Hierarchy
//!
//! Defines the error types for the versioned resource store, the dependency
//! propagation layer and the rollout machinery, categorized by the layer that
//! raises them.

use std::fmt;
use std::time::Duration;

use config::ConfigError;
use sled::transaction::TransactionError;

use crate::Kind;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (storage engine, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Per-resource failures: missing, blocked or invalid
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Rollout state machine violations
    #[error(transparent)]
    Rollout(#[from] RolloutError),

    /// Caller cancelled the operation before it could complete
    #[error("Operation cancelled")]
    Cancelled,

    /// Deadline elapsed while waiting on a background task
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    // Storage layer
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    // Serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// A multi-tree transaction could not be committed
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Stored payload could not be decoded
    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },

    /// Disk I/O failures while opening the database
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

// Serialization is classified separately (shared by storage and notifications)
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),
}

/// A resource that references another one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dependent {
    pub kind: Kind,
    pub name: String,
}

impl fmt::Display for Dependent {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}|{}", self.kind, self.name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// Resource or requested version does not exist
    #[error("{kind} {name} not found")]
    Missing { kind: Kind, name: String },

    /// Delete blocked because other resources still reference this one
    #[error("{kind} {name} is in use by {}", format_dependents(.dependents))]
    InUse {
        kind: Kind,
        name: String,
        dependents: Vec<Dependent>,
    },

    /// Validation failure, does not abort sibling items in a batch
    #[error("{reason}")]
    Invalid { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    /// Requested action is not allowed from the current rollout status
    #[error("Cannot {action} rollout of {name} while it is {from}")]
    InvalidTransition {
        name: String,
        from: String,
        action: &'static str,
    },
}

fn format_dependents(dependents: &[Dependent]) -> String {
    dependents.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
}

impl Error {
    pub fn missing(
        kind: Kind,
        name: impl Into<String>,
    ) -> Self {
        ResourceError::Missing {
            kind,
            name: name.into(),
        }
        .into()
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        ResourceError::Invalid {
            reason: reason.into(),
        }
        .into()
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Error::Resource(ResourceError::Missing { .. }))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Error::Resource(ResourceError::Invalid { .. }))
    }

    pub fn is_in_use(&self) -> bool {
        matches!(self, Error::Resource(ResourceError::InUse { .. }))
    }

    /// Engine-level failures abort a whole batch call instead of a single item.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            Error::System(SystemError::Storage(
                StorageError::DbError(_) | StorageError::Transaction(_) | StorageError::IoError(_)
            ))
        )
    }
}

// ============== Conversion Implementations ============== //
impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        SerializationError::Bincode(e).into()
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        StorageError::IoError(e).into()
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string()).into()
    }
}

impl From<TransactionError<Error>> for Error {
    fn from(err: TransactionError<Error>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StorageError::Transaction(e.to_string()).into(),
        }
    }
}
