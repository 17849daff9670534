//! Error types for recall-core.

use thiserror::Error;

use crate::memory::NodeId;

/// Result type alias using recall-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during memory operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Lookup of a node or thread that does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Caller supplied input that cannot be stored
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Owner exceeded its node capacity
    #[error("Owner {owner} holds {count} nodes, capacity is {capacity}")]
    CapacityExceeded {
        owner: String,
        count: usize,
        capacity: usize,
    },

    /// A single maintenance step could not be applied
    #[error("Maintenance step failed for node {node}: {reason}")]
    MaintenanceStepFailed { node: NodeId, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not-found error for a node.
    pub fn node_not_found(id: NodeId) -> Self {
        Self::NotFound {
            kind: "node",
            id: id.to_string(),
        }
    }

    /// Create a not-found error for a thread.
    pub fn thread_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind: "thread",
            id: id.to_string(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a maintenance step failure.
    pub fn maintenance_step(node: NodeId, reason: impl Into<String>) -> Self {
        Self::MaintenanceStepFailed {
            node,
            reason: reason.into(),
        }
    }

    /// Create an error for a poisoned lock.
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Internal(format!("Failed to lock {}: lock poisoned", what))
    }

    /// Whether the caller can reasonably fall back and continue.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}
