//! Persisted job records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{JobId, JobState, JobSubmission};

/// Outcome of the classification stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// No decision yet
    #[default]
    Pending,
    /// Content passed the sensitivity check
    Accepted,
    /// Content was flagged for review
    Flagged,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Pending => "pending",
            ResultStatus::Accepted => "accepted",
            ResultStatus::Flagged => "flagged",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to an uploaded media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaRef {
    /// Storage path of the uploaded file
    pub path: String,
    /// File name as uploaded by the user
    pub original_name: String,
    /// MIME type reported at upload
    pub mime_type: String,
    /// Size in bytes
    pub size_bytes: u64,
}

impl MediaRef {
    pub fn new(
        path: impl Into<String>,
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            path: path.into(),
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }
}

/// Opaque key/value metadata produced by classification
/// (duration, dimensions, bitrate, codec...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MediaMetadata(pub BTreeMap<String, Value>);

impl MediaMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Durable record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,

    /// Submitting user
    pub owner_id: String,

    /// Tenant/organization scope
    pub group_id: String,

    /// Uploaded media
    pub media: MediaRef,

    /// Lifecycle state
    #[serde(default)]
    pub state: JobState,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Classification outcome, set on completion
    #[serde(default)]
    pub result_status: ResultStatus,

    /// Classification metadata, set on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_metadata: Option<MediaMetadata>,

    /// Failure reason, set on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a fresh `Submitted` record for a submission.
    pub fn from_submission(submission: &JobSubmission, now: DateTime<Utc>) -> Self {
        Self {
            id: submission.job_id.clone(),
            owner_id: submission.owner_id.clone(),
            group_id: submission.group_id.clone(),
            media: submission.media.clone(),
            state: JobState::Submitted,
            progress: 0,
            result_status: ResultStatus::Pending,
            result_metadata: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Terminal records carry exactly one of the result pair or a failure
    /// reason. Non-terminal records carry neither.
    pub fn has_exclusive_terminal_fields(&self) -> bool {
        let has_result =
            self.result_status != ResultStatus::Pending && self.result_metadata.is_some();
        let has_partial_result =
            self.result_status != ResultStatus::Pending || self.result_metadata.is_some();
        let has_failure = self
            .failure_reason
            .as_deref()
            .is_some_and(|reason| !reason.is_empty());

        match self.state {
            JobState::Completed => has_result && self.failure_reason.is_none(),
            JobState::Failed => has_failure && !has_partial_result,
            JobState::Submitted | JobState::Processing => {
                !has_partial_result && self.failure_reason.is_none()
            }
        }
    }
}
