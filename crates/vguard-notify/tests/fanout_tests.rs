//! Fan-out behaviour through the public API.

use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;

use vguard_models::{JobId, JobState, ProgressEvent, ResultStatus};
use vguard_notify::NotificationHub;

fn event(job: &str, owner: &str, progress: u8, state: JobState) -> ProgressEvent {
    ProgressEvent {
        job_id: JobId::from(job),
        owner_id: owner.to_string(),
        group_id: "org-1".to_string(),
        progress,
        state,
        result_status: (state == JobState::Completed).then_some(ResultStatus::Accepted),
        message: None,
        timestamp: Utc::now(),
    }
}

/// A subscriber for one owner never sees another owner's events, even when
/// both owners' jobs interleave on the same channel.
#[tokio::test]
async fn test_interleaved_jobs_are_routed_by_owner() {
    let hub = NotificationHub::default();
    let alice = hub.subscribe("alice", "org-1");
    let mut bob = hub.subscribe("bob", "org-1");
    let (sink, _dispatcher) = hub.event_channel();

    for progress in [20, 40, 60] {
        sink.send(event("job-a", "alice", progress, JobState::Processing));
        sink.send(event("job-b", "bob", progress, JobState::Processing));
    }
    sink.send(event("job-a", "alice", 100, JobState::Completed));

    let alice_events: Vec<ProgressEvent> = tokio::time::timeout(
        Duration::from_secs(1),
        alice.into_stream().take(4).collect(),
    )
    .await
    .expect("alice stream stalled");

    assert!(alice_events.iter().all(|e| e.owner_id == "alice"));
    let progress: Vec<u8> = alice_events.iter().map(|e| e.progress).collect();
    assert_eq!(progress, vec![20, 40, 60, 100]);
    assert_eq!(alice_events.last().unwrap().result_status, Some(ResultStatus::Accepted));

    for expected in [20, 40, 60] {
        let received = bob.recv().await.unwrap();
        assert_eq!(received.owner_id, "bob");
        assert_eq!(received.progress, expected);
    }
    assert!(bob.try_recv().is_none());
}

/// Publishing to an owner with no subscribers is a no-op.
#[tokio::test]
async fn test_publish_without_subscribers() {
    let hub = NotificationHub::default();
    assert_eq!(hub.publish(&event("job-a", "nobody", 20, JobState::Processing)), 0);
    assert_eq!(hub.total_subscriptions(), 0);
}
