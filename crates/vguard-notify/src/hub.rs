//! Subscription table and fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, trace};

use vguard_models::ProgressEvent;

use crate::metrics;
use crate::subscription::{Subscription, SubscriptionId};

/// Default number of undelivered events buffered per subscriber.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;

/// Largest per-subscriber buffer a hub will allocate.
pub const MAX_SUBSCRIBER_BUFFER: usize = 4096;

/// Routing key of a subscription. Events are only delivered to subscriptions
/// whose owner and group both match the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TopicKey {
    pub(crate) owner_id: String,
    pub(crate) group_id: String,
}

struct Topic {
    sender: broadcast::Sender<ProgressEvent>,
    members: HashSet<SubscriptionId>,
}

pub(crate) struct HubInner {
    topics: RwLock<HashMap<TopicKey, Topic>>,
    buffer: usize,
    next_id: AtomicU64,
}

impl HubInner {
    pub(crate) fn remove(&self, id: SubscriptionId, key: &TopicKey) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(topic) = topics.get_mut(key) {
            if topic.members.remove(&id) {
                debug!(owner_id = %key.owner_id, subscription = %id, "Subscription removed");
            }
            if topic.members.is_empty() {
                topics.remove(key);
            }
        }
        metrics::set_active_subscriptions(count_members(&topics));
    }
}

fn count_members(topics: &HashMap<TopicKey, Topic>) -> usize {
    topics.values().map(|topic| topic.members.len()).sum()
}

/// Fans progress events out to the live connections of their owner.
///
/// Each subscription has its own bounded buffer. Publishing never blocks: a
/// subscriber that falls behind loses its oldest undelivered events and other
/// subscribers are unaffected.
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    /// Create a hub with the given per-subscriber buffer size, clamped to
    /// `1..=MAX_SUBSCRIBER_BUFFER`.
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                topics: RwLock::new(HashMap::new()),
                buffer: subscriber_buffer.clamp(1, MAX_SUBSCRIBER_BUFFER),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscriber_buffer(&self) -> usize {
        self.inner.buffer
    }

    /// Register interest in `owner_id`'s events within `group_id`.
    ///
    /// The pair must already be authorized by the caller.
    pub fn subscribe(&self, owner_id: impl Into<String>, group_id: impl Into<String>) -> Subscription {
        let key = TopicKey {
            owner_id: owner_id.into(),
            group_id: group_id.into(),
        };
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        let receiver = {
            let mut topics = self.inner.topics.write().unwrap_or_else(PoisonError::into_inner);
            let topic = topics.entry(key.clone()).or_insert_with(|| Topic {
                sender: broadcast::channel(self.inner.buffer).0,
                members: HashSet::new(),
            });
            topic.members.insert(id);
            let receiver = topic.sender.subscribe();
            metrics::set_active_subscriptions(count_members(&topics));
            receiver
        };

        debug!(owner_id = %key.owner_id, group_id = %key.group_id, subscription = %id, "Subscription added");
        Subscription::new(id, key, receiver, Arc::downgrade(&self.inner))
    }

    /// Remove a subscription. Safe to call repeatedly.
    pub fn unsubscribe(&self, subscription: &mut Subscription) {
        subscription.unsubscribe();
    }

    /// Deliver `event` to every subscription of its owner and group.
    ///
    /// Returns the number of subscriptions the event was queued for.
    pub fn publish(&self, event: &ProgressEvent) -> usize {
        let key = TopicKey {
            owner_id: event.owner_id.clone(),
            group_id: event.group_id.clone(),
        };

        let delivered = {
            let topics = self.inner.topics.read().unwrap_or_else(PoisonError::into_inner);
            match topics.get(&key) {
                Some(topic) => topic.sender.send(event.clone()).unwrap_or(0),
                None => 0,
            }
        };

        trace!(
            job_id = %event.job_id,
            owner_id = %event.owner_id,
            progress = event.progress,
            state = %event.state,
            delivered,
            "Published progress event"
        );
        metrics::record_published(event.state.as_str(), delivered);
        delivered
    }

    /// Number of live subscriptions for an owner across all groups.
    pub fn subscriber_count(&self, owner_id: &str) -> usize {
        self.inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(key, _)| key.owner_id == owner_id)
            .map(|(_, topic)| topic.members.len())
            .sum()
    }

    /// Number of live subscriptions overall.
    pub fn total_subscriptions(&self) -> usize {
        count_members(&self.inner.topics.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}
