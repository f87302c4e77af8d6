//! Job identity, lifecycle state and submissions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::MediaRef;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a job record.
///
/// `Submitted -> Processing -> {Completed | Failed}`. A job that never got
/// to run may also go straight from `Submitted` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, runner not started yet
    #[default]
    Submitted,
    /// Runner is driving the pipeline
    Processing,
    /// Pipeline finished with a result
    Completed,
    /// Pipeline aborted with a failure reason
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Submitted => "submitted",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Terminal states are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Check whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Submitted, JobState::Processing)
                | (JobState::Submitted, JobState::Failed)
                | (JobState::Processing, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A media item handed to the engine for processing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobSubmission {
    /// Job ID chosen by the caller
    pub job_id: JobId,
    /// Uploading user; events are routed to this owner
    pub owner_id: String,
    /// Tenant scope
    pub group_id: String,
    /// Uploaded media
    pub media: MediaRef,
}

impl JobSubmission {
    /// Create a submission with a freshly generated job ID.
    pub fn new(owner_id: impl Into<String>, group_id: impl Into<String>, media: MediaRef) -> Self {
        Self::with_id(JobId::new(), owner_id, group_id, media)
    }

    /// Create a submission for an existing job ID.
    pub fn with_id(
        job_id: JobId,
        owner_id: impl Into<String>,
        group_id: impl Into<String>,
        media: MediaRef,
    ) -> Self {
        Self {
            job_id,
            owner_id: owner_id.into(),
            group_id: group_id.into(),
            media,
        }
    }
}
