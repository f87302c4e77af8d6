//! Shared data models for the VGuard processing engine.
//!
//! This crate provides Serde-serializable types for:
//! - Job identity, state and submissions
//! - Persisted job records and classification results
//! - Progress events for live subscribers

pub mod event;
pub mod job;
pub mod record;

// Re-export common types
pub use event::{ProgressEvent, PROGRESS_EVENT_NAME};
pub use job::{JobId, JobState, JobSubmission};
pub use record::{JobRecord, MediaMetadata, MediaRef, ResultStatus};
