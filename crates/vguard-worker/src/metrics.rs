//! Job lifecycle metrics.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP scrape endpoint on `port`.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
}

/// Metric name constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "vguard_jobs_submitted_total";
    pub const JOBS_REJECTED_TOTAL: &str = "vguard_jobs_rejected_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vguard_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vguard_jobs_failed_total";
    pub const JOBS_ACTIVE: &str = "vguard_jobs_active";
    pub const STAGE_DURATION_SECONDS: &str = "vguard_stage_duration_seconds";
    pub const STALE_JOBS_RECOVERED_TOTAL: &str = "vguard_stale_jobs_recovered_total";
}

pub fn record_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_rejected(reason: &'static str) {
    counter!(names::JOBS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_completed(result: &'static str) {
    counter!(names::JOBS_COMPLETED_TOTAL, "result" => result).increment(1);
}

pub fn record_failed(reason: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "reason" => reason).increment(1);
}

pub fn set_active_jobs(count: usize) {
    gauge!(names::JOBS_ACTIVE).set(count as f64);
}

pub fn record_stage(stage: &str, elapsed: Duration) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.to_string())
        .record(elapsed.as_secs_f64());
}

/// Record a job failed by the watchdog or startup recovery.
pub fn record_recovered(reason: &'static str) {
    counter!(names::STALE_JOBS_RECOVERED_TOTAL, "reason" => reason).increment(1);
}
