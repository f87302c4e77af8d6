//! Notification hub metrics.

use metrics::{counter, gauge};

/// Metric name constants for consistency.
pub mod names {
    pub const EVENTS_PUBLISHED_TOTAL: &str = "vguard_events_published_total";
    pub const EVENTS_DELIVERED_TOTAL: &str = "vguard_events_delivered_total";
    pub const EVENTS_DROPPED_TOTAL: &str = "vguard_events_dropped_total";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "vguard_subscriptions_active";
}

/// Record a published event and how many subscriptions it reached.
pub fn record_published(state: &'static str, receivers: usize) {
    counter!(names::EVENTS_PUBLISHED_TOTAL, "state" => state).increment(1);
    counter!(names::EVENTS_DELIVERED_TOTAL).increment(receivers as u64);
}

/// Record events lost by a lagging subscriber.
pub fn record_dropped(count: u64) {
    counter!(names::EVENTS_DROPPED_TOTAL).increment(count);
}

pub fn set_active_subscriptions(count: usize) {
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(count as f64);
}
