//! Event channel between job runners and the hub.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vguard_models::ProgressEvent;

use crate::hub::NotificationHub;

/// Sending half of the event channel handed to job runners.
///
/// Sending never blocks. Events from one sender are published in the order
/// they were sent.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl EventSink {
    /// Queue an event for publication.
    ///
    /// Returns `false` if the dispatcher is gone; delivery is best-effort.
    pub fn send(&self, event: ProgressEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(err) => {
                warn!(job_id = %err.0.job_id, "Progress event dropped, dispatcher stopped");
                false
            }
        }
    }
}

impl NotificationHub {
    /// Open an event channel and spawn the dispatcher that drains it into
    /// [`NotificationHub::publish`].
    ///
    /// The dispatcher exits once every `EventSink` clone is dropped.
    pub fn event_channel(&self) -> (EventSink, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let hub = self.clone();

        let dispatcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                hub.publish(&event);
            }
            debug!("Progress event dispatcher stopped");
        });

        (EventSink { tx }, dispatcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vguard_models::{JobId, JobState};

    fn event(job: &str, progress: u8) -> ProgressEvent {
        ProgressEvent {
            job_id: JobId::from(job),
            owner_id: "user-1".into(),
            group_id: "org-1".into(),
            progress,
            state: JobState::Processing,
            result_status: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_preserves_order() {
        let hub = NotificationHub::default();
        let mut sub = hub.subscribe("user-1", "org-1");
        let (sink, dispatcher) = hub.event_channel();

        for progress in [20, 40, 60, 80, 95] {
            assert!(sink.send(event("job-1", progress)));
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(sub.recv().await.unwrap().progress);
        }
        assert_eq!(seen, vec![20, 40, 60, 80, 95]);

        drop(sink);
        dispatcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_dispatcher_stopped() {
        let hub = NotificationHub::default();
        let (sink, dispatcher) = hub.event_channel();
        dispatcher.abort();
        let _ = dispatcher.await;
        assert!(!sink.send(event("job-1", 20)));
    }
}
