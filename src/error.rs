//! Typed errors for store operations.

use thiserror::Error;

/// Error type shared by every store operation.
///
/// Callers match on the variant (or the stable [`code`](StoreError::code))
/// to distinguish "absent" from "held by someone else" from "engine broke".
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation is not valid for the entity's current state.
    #[error("{message}")]
    InvalidState { message: String },

    /// A live executor already holds the task.
    #[error("task {task_id} already claimed by live pid {pid}")]
    AlreadyClaimed { task_id: String, pid: u32 },

    /// The optimistic claim update matched zero rows: another claim won.
    #[error("claim race lost for task {task_id}")]
    RaceLost { task_id: String },

    /// Input was rejected before any write happened.
    #[error("validation failed for {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The caller's cancellation token fired; the transaction rolled back.
    #[error("operation canceled")]
    Canceled,

    /// The underlying storage engine failed.
    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl StoreError {
    /// Stable code for programmatic error handling.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "NOT_FOUND",
            StoreError::InvalidState { .. } => "INVALID_STATE",
            StoreError::AlreadyClaimed { .. } => "ALREADY_CLAIMED",
            StoreError::RaceLost { .. } => "RACE_LOST",
            StoreError::Validation { .. } => "VALIDATION_FAILED",
            StoreError::Canceled => "CANCELED",
            StoreError::Storage(_) => "STORAGE_FAILURE",
        }
    }

    // Convenience constructors

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        StoreError::InvalidState {
            message: message.into(),
        }
    }

    pub fn already_claimed(task_id: impl Into<String>, pid: u32) -> Self {
        StoreError::AlreadyClaimed {
            task_id: task_id.into(),
            pid,
        }
    }

    pub fn race_lost(task_id: impl Into<String>) -> Self {
        StoreError::RaceLost {
            task_id: task_id.into(),
        }
    }

    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        StoreError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        StoreError::Storage(anyhow::anyhow!(message.into()))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Storage(anyhow::Error::new(err))
    }
}

impl From<refinery::Error> for StoreError {
    fn from(err: refinery::Error) -> Self {
        StoreError::Storage(anyhow::Error::new(err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Storage(anyhow::Error::new(err))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
