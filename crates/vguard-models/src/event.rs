//! Progress events pushed to live subscribers.
//!
//! Events are transient: they are never persisted or replayed. A client that
//! reconnects reconciles from the job record instead.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{JobId, JobRecord, JobState, ResultStatus};

/// Name of the event on the real-time transport.
pub const PROGRESS_EVENT_NAME: &str = "video-progress";

/// Snapshot of a job's latest progress and state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub owner_id: String,
    pub group_id: String,
    pub progress: u8,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_status: Option<ResultStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Build an event mirroring the current record, stamped `at`.
    ///
    /// `result_status` is only carried once the record completed.
    pub fn from_record(record: &JobRecord, at: DateTime<Utc>) -> Self {
        let result_status = match record.state {
            JobState::Completed => Some(record.result_status),
            _ => None,
        };
        Self {
            job_id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            group_id: record.group_id.clone(),
            progress: record.progress,
            state: record.state,
            result_status,
            message: None,
            timestamp: at,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
