//! # Store Errors

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Control-plane store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Node id does not exist
    #[error("node does not exist: {0}")]
    NodeNotFound(String),

    /// Instance id does not exist
    #[error("instance does not exist: {0}")]
    InstanceNotFound(String),

    /// User id does not exist
    #[error("user does not exist: {0}")]
    UserNotFound(String),

    /// Instance id already taken
    #[error("instance already exists: {0}")]
    DuplicateInstance(String),

    /// Underlying storage failed (lock poisoned, snapshot write, ...)
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Whether the error was caused by a reference in the request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::NodeNotFound(_) | StoreError::UserNotFound(_)
        )
    }
}
