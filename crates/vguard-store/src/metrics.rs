//! Record store metrics.
//!
//! - Operation counters by operation and outcome
//! - Latency histograms

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total store operations by operation and outcome.
    pub const OPERATIONS_TOTAL: &str = "vguard_store_operations_total";

    /// Operation latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "vguard_store_latency_seconds";
}

/// Record metrics for a completed store operation.
pub fn record_operation(operation: &'static str, ok: bool, latency_secs: f64) {
    let outcome = if ok { "ok" } else { "error" };

    counter!(
        names::OPERATIONS_TOTAL,
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);

    histogram!(names::LATENCY_SECONDS, "operation" => operation).record(latency_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::OPERATIONS_TOTAL.starts_with("vguard_store_"));
        assert!(names::LATENCY_SECONDS.contains("latency"));
    }
}
