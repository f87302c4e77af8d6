//! Subscription handles.

use std::fmt;
use std::sync::Weak;

use futures_util::Stream;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

use vguard_models::ProgressEvent;

use crate::hub::{HubInner, TopicKey};
use crate::metrics;

/// Identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live subscription to one owner's progress events.
///
/// Dropping the handle unsubscribes it.
pub struct Subscription {
    id: SubscriptionId,
    key: TopicKey,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    hub: Weak<HubInner>,
    dropped: u64,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        key: TopicKey,
        receiver: broadcast::Receiver<ProgressEvent>,
        hub: Weak<HubInner>,
    ) -> Self {
        Self {
            id,
            key,
            receiver: Some(receiver),
            hub,
            dropped: 0,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.key.owner_id
    }

    pub fn group_id(&self) -> &str {
        &self.key.group_id
    }

    /// Events this subscriber lost because its buffer overflowed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once unsubscribed or when the hub is gone.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Stop receiving events. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        if self.receiver.take().is_some() {
            if let Some(hub) = self.hub.upgrade() {
                hub.remove(self.id, &self.key);
            }
        }
    }

    /// Turn the subscription into a stream for a transport layer.
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        futures_util::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|event| (event, subscription))
        })
    }

    fn record_lag(&mut self, skipped: u64) {
        self.dropped += skipped;
        metrics::record_dropped(skipped);
        debug!(
            owner_id = %self.key.owner_id,
            subscription = %self.id,
            skipped,
            "Subscriber fell behind, dropped oldest events"
        );
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("owner_id", &self.key.owner_id)
            .field("group_id", &self.key.group_id)
            .field("active", &self.receiver.is_some())
            .field("dropped", &self.dropped)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
