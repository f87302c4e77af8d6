//! Record store error types.

use thiserror::Error;

use vguard_models::{JobId, JobState};

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(JobId),

    #[error("Record already exists: {0}")]
    AlreadyExists(JobId),

    #[error("Record {job_id} is terminal ({state}) and cannot be updated")]
    TerminalRecord { job_id: JobId, state: JobState },

    #[error("Record {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Record {job_id} progress cannot go from {current} back to {requested}")]
    ProgressRegression {
        job_id: JobId,
        current: u8,
        requested: u8,
    },

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn invalid_update(msg: impl Into<String>) -> Self {
        Self::InvalidUpdate(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// True if the update lost a race against a terminal transition.
    pub fn is_terminal_conflict(&self) -> bool {
        matches!(self, StoreError::TerminalRecord { .. })
    }
}
