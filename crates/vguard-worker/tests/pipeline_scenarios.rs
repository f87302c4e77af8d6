//! End-to-end job scenarios through the engine's public API.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use vguard_models::{JobId, JobRecord, JobState, JobSubmission, MediaRef, ProgressEvent, ResultStatus};
use vguard_notify::Subscription;
use vguard_store::{InMemoryRecordStore, RecordStore};
use vguard_worker::{
    ClassificationError, Engine, JobOutcome, StaticClassifier, WorkerConfig, WorkerError,
};

fn media(name: &str) -> MediaRef {
    MediaRef::new(format!("uploads/{name}"), name, "video/mp4", 1_048_576)
}

fn engine(classifier: StaticClassifier) -> Engine {
    Engine::builder(WorkerConfig::default())
        .classifier(Arc::new(classifier))
        .build()
}

/// Events received until the subscription goes quiet.
async fn collect(sub: &mut Subscription) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn happy_path_reports_every_stage() {
    let engine = engine(StaticClassifier::accepting());
    let mut sub = engine.subscribe("user-a", "org-1");

    let mut handle = engine
        .submit(JobId::from("job-1"), "user-a", "org-1", media("a.mp4"))
        .await
        .unwrap();
    assert!(handle.wait().await.is_completed());

    let events = collect(&mut sub).await;
    let progress: Vec<u8> = events.iter().map(|e| e.progress).collect();
    assert_eq!(progress, vec![20, 40, 60, 80, 95, 100]);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));

    let last = events.last().unwrap();
    assert_eq!(last.state, JobState::Completed);
    assert_eq!(last.result_status, Some(ResultStatus::Accepted));

    let record = engine.get_record(&JobId::from("job-1")).await.unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.progress, 100);
    assert!(record.has_exclusive_terminal_fields());
}

#[tokio::test(start_paused = true)]
async fn classifier_failure_freezes_progress() {
    let engine = engine(StaticClassifier::failing(ClassificationError::failed(
        "decoder crashed",
    )));
    let mut sub = engine.subscribe("user-a", "org-1");

    let mut handle = engine
        .submit(JobId::from("job-2"), "user-a", "org-1", media("b.mp4"))
        .await
        .unwrap();
    let outcome = handle.wait().await;
    assert_eq!(
        outcome,
        JobOutcome::Failed {
            reason: "classification failed: decoder crashed".into(),
            progress: 95,
            persisted: true,
        }
    );

    let events = collect(&mut sub).await;
    let failed: Vec<_> = events.iter().filter(|e| e.state == JobState::Failed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(events.last().unwrap().state, JobState::Failed);

    let record = engine.get_record(&JobId::from("job-2")).await.unwrap();
    assert_eq!(record.state, JobState::Failed);
    assert_eq!(record.progress, 95);
    assert!(record.has_exclusive_terminal_fields());
}

#[tokio::test(start_paused = true)]
async fn duplicate_submission_runs_once() {
    let engine = engine(StaticClassifier::flagging());
    let mut sub = engine.subscribe("user-a", "org-1");

    let mut first = engine
        .submit(JobId::from("job-3"), "user-a", "org-1", media("c.mp4"))
        .await
        .unwrap();
    let second = engine
        .submit(JobId::from("job-3"), "user-a", "org-1", media("c.mp4"))
        .await;
    assert!(matches!(second, Err(WorkerError::DuplicateJob(_))));

    assert_eq!(
        first.wait().await,
        JobOutcome::Completed {
            result_status: ResultStatus::Flagged
        }
    );
    let terminal = collect(&mut sub)
        .await
        .into_iter()
        .filter(ProgressEvent::is_terminal)
        .count();
    assert_eq!(terminal, 1);
}

#[tokio::test(start_paused = true)]
async fn owners_only_see_their_own_jobs() {
    let engine = engine(StaticClassifier::accepting());
    let mut alice = engine.subscribe("user-a", "org-1");
    let mut bob = engine.subscribe("user-b", "org-1");
    let mut alice_elsewhere = engine.subscribe("user-a", "org-2");

    let mut a = engine
        .submit(JobId::from("a-1"), "user-a", "org-1", media("a.mp4"))
        .await
        .unwrap();
    let mut b = engine
        .submit(JobId::from("b-1"), "user-b", "org-1", media("b.mp4"))
        .await
        .unwrap();
    a.wait().await;
    b.wait().await;

    let alice_events = collect(&mut alice).await;
    let bob_events = collect(&mut bob).await;
    assert_eq!(alice_events.len(), 6);
    assert_eq!(bob_events.len(), 6);
    assert!(alice_events.iter().all(|e| e.job_id.as_str() == "a-1"));
    assert!(bob_events.iter().all(|e| e.job_id.as_str() == "b-1"));
    assert!(alice_elsewhere.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_running_job() {
    let engine = Engine::builder(WorkerConfig {
        shutdown_timeout: Duration::from_secs(2),
        ..WorkerConfig::default()
    })
    .classifier(Arc::new(StaticClassifier::accepting()))
    .build();

    let mut handle = engine
        .submit(JobId::from("job-4"), "user-a", "org-1", media("d.mp4"))
        .await
        .unwrap();
    assert_eq!(engine.shutdown().await, 1);

    let outcome = handle.wait().await;
    assert_eq!(outcome.failure_reason(), Some("interrupted"));

    let record = engine.get_record(&JobId::from("job-4")).await.unwrap();
    assert_eq!(record.state, JobState::Failed);
    assert!(record.progress < 100);
    assert!(engine.active_jobs().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn startup_recovers_records_from_a_previous_process() {
    let store = Arc::new(InMemoryRecordStore::new());
    let left_over = JobSubmission::with_id(JobId::from("job-5"), "user-a", "org-1", media("e.mp4"));
    store
        .create(JobRecord::from_submission(&left_over, Utc::now()))
        .await
        .unwrap();

    let engine = Engine::builder(WorkerConfig::default())
        .store(store.clone())
        .classifier(Arc::new(StaticClassifier::accepting()))
        .build();
    let mut sub = engine.subscribe("user-a", "org-1");
    assert_eq!(engine.start().await.unwrap(), 1);

    let record = engine.get_record(&JobId::from("job-5")).await.unwrap();
    assert_eq!(record.state, JobState::Failed);
    assert_eq!(record.failure_reason.as_deref(), Some("interrupted"));

    let event = sub.recv().await.unwrap();
    assert_eq!(event.state, JobState::Failed);
    assert_eq!(event.job_id.as_str(), "job-5");

    engine.shutdown().await;
}
