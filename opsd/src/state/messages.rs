//! State manager messages
//!
//! Commands and responses for the actor pattern.

use taskstore::{Store, StoreError};
use thiserror::Error;

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Channel error")]
    ChannelError,
}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => Self::NotFound(format!("{} {}", collection, id)),
            StoreError::Serialization(e) => Self::DeserializationError(e.to_string()),
            other => Self::StoreError(other.to_string()),
        }
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// A unit of work run against the store on the actor task
pub type StoreOp = Box<dyn FnOnce(&mut Store) + Send>;

/// Commands sent to the StateManager actor
pub enum StateCommand {
    /// Run an operation against the store; the closure carries its own reply channel
    Execute(StoreOp),
    /// Stop the actor after draining earlier commands
    Shutdown,
}

impl std::fmt::Debug for StateCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execute(_) => write!(f, "Execute(..)"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: StateError = StoreError::NotFound {
            collection: "runs",
            id: 4,
        }
        .into();
        assert!(matches!(err, StateError::NotFound(ref s) if s == "runs 4"));
    }
}
