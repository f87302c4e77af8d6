//! Progress notification hub.
//!
//! This crate provides:
//! - Per-owner, per-group subscription table
//! - Non-blocking fan-out with bounded per-subscriber buffers (oldest dropped)
//! - An event channel decoupling job runners from delivery

pub mod hub;
pub mod metrics;
pub mod sink;
pub mod subscription;

pub use hub::{NotificationHub, DEFAULT_SUBSCRIBER_BUFFER, MAX_SUBSCRIBER_BUFFER};
pub use sink::EventSink;
pub use subscription::{Subscription, SubscriptionId};
