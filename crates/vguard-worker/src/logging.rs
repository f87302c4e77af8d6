//! Structured job logging utilities.
//!
//! Gives every job lifecycle log line the same `job_id` / `owner_id` fields
//! and a per-job tracing span.

use tracing::{error, info, warn, Span};

use vguard_models::JobId;

/// Job logger for consistent lifecycle log lines.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    owner_id: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, owner_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            owner_id: owner_id.to_string(),
        }
    }

    pub fn log_start(&self, media: &str) {
        info!(
            job_id = %self.job_id,
            owner_id = %self.owner_id,
            "Job started: {}", media
        );
    }

    /// Log a completed stage checkpoint.
    pub fn log_stage(&self, stage: &str, progress: u8) {
        info!(
            job_id = %self.job_id,
            owner_id = %self.owner_id,
            stage,
            progress,
            "Job progress: {} reached", stage
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            owner_id = %self.owner_id,
            "Job warning: {}", message
        );
    }

    pub fn log_failure(&self, reason: &str, progress: u8) {
        error!(
            job_id = %self.job_id,
            owner_id = %self.owner_id,
            progress,
            "Job failed: {}", reason
        );
    }

    pub fn log_completion(&self, status: &str) {
        info!(
            job_id = %self.job_id,
            owner_id = %self.owner_id,
            "Job completed: {}", status
        );
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            owner_id = %self.owner_id
        )
    }
}
