//! Worker error types.

use thiserror::Error;

use vguard_models::JobId;
use vguard_store::StoreError;

use crate::pipeline::PipelineError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors raised by a classifier.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassificationError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("{0}")]
    Failed(String),
}

impl ClassificationError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job {0} already has an active runner")]
    DuplicateJob(JobId),

    #[error("Job {0} already has a record; submit with a new ID")]
    AlreadyRecorded(JobId),

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Classification failed: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job timed out")]
    Timeout,

    #[error("Job interrupted")]
    Interrupted,

    #[error("Job cancelled")]
    Cancelled,

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(#[from] PipelineError),
}

impl WorkerError {
    /// Reason persisted on a Failed record.
    pub fn failure_reason(&self) -> String {
        match self {
            WorkerError::Timeout => "timeout".to_string(),
            WorkerError::Interrupted => "interrupted".to_string(),
            WorkerError::Cancelled => "cancelled".to_string(),
            WorkerError::Classification(e) => format!("classification failed: {e}"),
            WorkerError::Store(e) => format!("record store error: {e}"),
            other => other.to_string(),
        }
    }

    /// Low-cardinality label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::DuplicateJob(_) => "duplicate",
            WorkerError::AlreadyRecorded(_) => "already_recorded",
            WorkerError::ShuttingDown => "shutting_down",
            WorkerError::NotFound(_) => "not_found",
            WorkerError::Classification(_) => "classification",
            WorkerError::Store(_) => "store",
            WorkerError::Timeout => "timeout",
            WorkerError::Interrupted => "interrupted",
            WorkerError::Cancelled => "cancelled",
            WorkerError::InvalidPipeline(_) => "invalid_pipeline",
        }
    }

    /// True for rejections at admission, before any record was written.
    pub fn is_admission_rejection(&self) -> bool {
        matches!(
            self,
            WorkerError::DuplicateJob(_) | WorkerError::AlreadyRecorded(_) | WorkerError::ShuttingDown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reasons() {
        assert_eq!(WorkerError::Timeout.failure_reason(), "timeout");
        assert_eq!(WorkerError::Interrupted.failure_reason(), "interrupted");
        assert_eq!(WorkerError::Cancelled.failure_reason(), "cancelled");
        assert_eq!(
            WorkerError::from(ClassificationError::unavailable("model offline")).failure_reason(),
            "classification failed: classifier unavailable: model offline"
        );
        assert_eq!(
            WorkerError::from(StoreError::unavailable("disk full")).failure_reason(),
            "record store error: Store unavailable: disk full"
        );
    }

    #[test]
    fn test_admission_rejections() {
        assert!(WorkerError::DuplicateJob(JobId::from("a")).is_admission_rejection());
        assert!(WorkerError::ShuttingDown.is_admission_rejection());
        assert!(!WorkerError::Timeout.is_admission_rejection());
    }
}
