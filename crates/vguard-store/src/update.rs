//! Field-level record updates.
//!
//! Every store implementation applies updates through [`RecordUpdate::apply`]
//! so the lifecycle rules hold regardless of the backend: terminal records are
//! immutable, progress never decreases, and terminal transitions carry exactly
//! one of the result pair or a failure reason.

use chrono::{DateTime, Utc};

use vguard_models::{JobRecord, JobState, MediaMetadata, ResultStatus};

use crate::error::{StoreError, StoreResult};

/// A set of fields to write atomically to one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub state: Option<JobState>,
    pub progress: Option<u8>,
    pub result_status: Option<ResultStatus>,
    pub result_metadata: Option<MediaMetadata>,
    pub failure_reason: Option<String>,
}

impl RecordUpdate {
    /// Runner took the job: `Processing`, progress reset to 0.
    pub fn start() -> Self {
        Self {
            state: Some(JobState::Processing),
            progress: Some(0),
            ..Self::default()
        }
    }

    /// Stage checkpoint reached.
    pub fn progress(value: u8) -> Self {
        Self {
            progress: Some(value),
            ..Self::default()
        }
    }

    /// Pipeline finished with a classification result.
    pub fn complete(status: ResultStatus, metadata: MediaMetadata) -> Self {
        Self {
            state: Some(JobState::Completed),
            progress: Some(100),
            result_status: Some(status),
            result_metadata: Some(metadata),
            failure_reason: None,
        }
    }

    /// Pipeline aborted. Progress stays where it was.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            state: Some(JobState::Failed),
            failure_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Names of the fields this update touches (`updated_at` is always written).
    pub fn field_paths(&self) -> Vec<&'static str> {
        let mut paths = Vec::with_capacity(6);
        if self.state.is_some() {
            paths.push("state");
        }
        if self.progress.is_some() {
            paths.push("progress");
        }
        if self.result_status.is_some() {
            paths.push("result_status");
        }
        if self.result_metadata.is_some() {
            paths.push("result_metadata");
        }
        if self.failure_reason.is_some() {
            paths.push("failure_reason");
        }
        paths.push("updated_at");
        paths
    }

    /// Validate this update against `record` and write it in place.
    ///
    /// On error the record is left untouched.
    pub fn apply(&self, record: &mut JobRecord, now: DateTime<Utc>) -> StoreResult<()> {
        if record.state.is_terminal() {
            return Err(StoreError::TerminalRecord {
                job_id: record.id.clone(),
                state: record.state,
            });
        }

        let next_state = self.state.unwrap_or(record.state);
        if next_state != record.state && !record.state.can_transition_to(next_state) {
            return Err(StoreError::InvalidTransition {
                job_id: record.id.clone(),
                from: record.state,
                to: next_state,
            });
        }

        if let Some(progress) = self.progress {
            if progress > 100 {
                return Err(StoreError::invalid_update(format!(
                    "progress {} is out of range",
                    progress
                )));
            }
            if progress < record.progress {
                return Err(StoreError::ProgressRegression {
                    job_id: record.id.clone(),
                    current: record.progress,
                    requested: progress,
                });
            }
        }

        self.check_terminal_fields(next_state)?;

        record.state = next_state;
        if let Some(progress) = self.progress {
            record.progress = progress;
        }
        if let Some(status) = self.result_status {
            record.result_status = status;
        }
        if let Some(metadata) = &self.result_metadata {
            record.result_metadata = Some(metadata.clone());
        }
        if let Some(reason) = &self.failure_reason {
            record.failure_reason = Some(reason.clone());
        }
        record.updated_at = now;

        Ok(())
    }

    fn check_terminal_fields(&self, next_state: JobState) -> StoreResult<()> {
        let sets_result = self.result_status.is_some() || self.result_metadata.is_some();
        let sets_failure = self.failure_reason.is_some();

        match next_state {
            JobState::Completed => {
                if sets_failure {
                    return Err(StoreError::invalid_update(
                        "a completed record cannot carry a failure reason",
                    ));
                }
                match (self.result_status, &self.result_metadata) {
                    (Some(status), Some(_)) if status != ResultStatus::Pending => Ok(()),
                    _ => Err(StoreError::invalid_update(
                        "completion requires a result status and metadata",
                    )),
                }
            }
            JobState::Failed => {
                if sets_result {
                    return Err(StoreError::invalid_update(
                        "a failed record cannot carry a result",
                    ));
                }
                match self.failure_reason.as_deref() {
                    Some(reason) if !reason.trim().is_empty() => Ok(()),
                    _ => Err(StoreError::invalid_update(
                        "failure requires a non-empty reason",
                    )),
                }
            }
            JobState::Submitted | JobState::Processing => {
                if sets_result || sets_failure {
                    return Err(StoreError::invalid_update(
                        "result and failure fields are only written on terminal transitions",
                    ));
                }
                Ok(())
            }
        }
    }
}
