//! Job runner: walks one job through the stage pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, Instrument};

use vguard_models::{JobId, JobRecord, JobState, JobSubmission, ProgressEvent, ResultStatus};
use vguard_notify::EventSink;
use vguard_store::{Clock, RecordStore, RecordUpdate};

use crate::classifier::Classifier;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::{StageKind, StagePipeline};

/// Liveness signal a runner refreshes after every persisted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub at: Instant,
    pub progress: u8,
}

impl Heartbeat {
    pub fn now(progress: u8) -> Self {
        Self {
            at: Instant::now(),
            progress,
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        result_status: ResultStatus,
    },
    Failed {
        reason: String,
        progress: u8,
        /// False if the Failed state could not be written to the store.
        persisted: bool,
    },
}

impl JobOutcome {
    /// Outcome mirrored from a terminal record.
    pub fn from_record(record: &JobRecord) -> Option<Self> {
        match record.state {
            JobState::Completed => Some(JobOutcome::Completed {
                result_status: record.result_status,
            }),
            JobState::Failed => Some(JobOutcome::Failed {
                reason: record.failure_reason.clone().unwrap_or_default(),
                progress: record.progress,
                persisted: true,
            }),
            JobState::Submitted | JobState::Processing => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            JobOutcome::Failed { reason, .. } => Some(reason),
            JobOutcome::Completed { .. } => None,
        }
    }
}

/// Collaborators shared by every runner.
#[derive(Clone)]
pub struct RunnerDeps {
    pub store: Arc<dyn RecordStore>,
    pub classifier: Arc<dyn Classifier>,
    pub pipeline: Arc<StagePipeline>,
    pub events: EventSink,
    pub stage_delay: Duration,
    /// Stamps progress events; records are stamped by the store.
    pub clock: Arc<dyn Clock>,
}

/// Failed event for a job whose record could not be read back.
pub(crate) fn failed_event(
    job_id: &JobId,
    owner_id: &str,
    group_id: &str,
    progress: u8,
    reason: &str,
    at: DateTime<Utc>,
) -> ProgressEvent {
    ProgressEvent {
        job_id: job_id.clone(),
        owner_id: owner_id.to_string(),
        group_id: group_id.to_string(),
        progress,
        state: JobState::Failed,
        result_status: None,
        message: Some(reason.to_string()),
        timestamp: at,
    }
}

pub struct JobRunner {
    submission: JobSubmission,
    deps: RunnerDeps,
    cancel: CancellationToken,
    heartbeat: watch::Sender<Heartbeat>,
    logger: JobLogger,
}

impl JobRunner {
    pub fn new(
        submission: JobSubmission,
        deps: RunnerDeps,
        cancel: CancellationToken,
        heartbeat: watch::Sender<Heartbeat>,
    ) -> Self {
        let logger = JobLogger::new(&submission.job_id, &submission.owner_id);
        Self {
            submission,
            deps,
            cancel,
            heartbeat,
            logger,
        }
    }

    /// Drive the job to a terminal state.
    ///
    /// Stage errors never escape: they end in a Failed record and one Failed
    /// event.
    pub async fn run(self) -> JobOutcome {
        let span = self.logger.create_span();
        async move {
            let mut progress = 0u8;
            let result = self.drive(&mut progress).await;
            match result {
                Ok(status) => {
                    self.logger.log_completion(status.as_str());
                    metrics::record_completed(status.as_str());
                    JobOutcome::Completed {
                        result_status: status,
                    }
                }
                Err(err) => self.fail(err, progress).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, progress: &mut u8) -> WorkerResult<ResultStatus> {
        let job_id = &self.submission.job_id;
        let store = &self.deps.store;

        store.atomic_update(job_id, RecordUpdate::start()).await?;
        self.beat(0);
        self.logger.log_start(&self.submission.media.original_name);

        for stage in self.deps.pipeline.stages() {
            if self.cancel.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
            let started = Instant::now();

            match stage.kind {
                StageKind::Checkpoint => {
                    tokio::time::sleep(self.deps.stage_delay).await;

                    let record = store
                        .atomic_update(job_id, RecordUpdate::progress(stage.target_progress))
                        .await?;
                    *progress = record.progress;
                    self.beat(record.progress);
                    metrics::record_stage(&stage.name, started.elapsed());
                    self.logger.log_stage(&stage.name, record.progress);
                    self.emit(ProgressEvent::from_record(&record, self.now()).with_message(stage.message.as_str()));
                }
                StageKind::Classify => {
                    let classification = self.deps.classifier.classify(&self.submission.media).await?;

                    let record = store
                        .atomic_update(
                            job_id,
                            RecordUpdate::complete(classification.status, classification.metadata),
                        )
                        .await?;
                    *progress = record.progress;
                    self.beat(record.progress);
                    metrics::record_stage(&stage.name, started.elapsed());

                    let message = format!("Analysis complete. Status: {}", record.result_status);
                    self.emit(ProgressEvent::from_record(&record, self.now()).with_message(message));
                    return Ok(record.result_status);
                }
            }
        }

        // StagePipeline::new guarantees a trailing classification stage.
        Err(WorkerError::InvalidPipeline(
            crate::pipeline::PipelineError::MissingClassification,
        ))
    }

    async fn fail(&self, err: WorkerError, progress: u8) -> JobOutcome {
        let job_id = &self.submission.job_id;
        let reason = err.failure_reason();

        if matches!(&err, WorkerError::Store(e) if e.is_terminal_conflict()) {
            self.logger.log_warning(&format!("terminated elsewhere: {err}"));
            return self.stored_outcome(reason, progress).await;
        }

        self.logger.log_failure(&reason, progress);
        metrics::record_failed(err.kind());

        match self
            .deps
            .store
            .atomic_update(job_id, RecordUpdate::fail(reason.clone()))
            .await
        {
            Ok(record) => {
                self.emit(ProgressEvent::from_record(&record, self.now()).with_message(reason.as_str()));
                JobOutcome::Failed {
                    reason,
                    progress: record.progress,
                    persisted: true,
                }
            }
            Err(store_err) if store_err.is_terminal_conflict() => {
                self.logger
                    .log_warning(&format!("record already terminal, failure not written: {store_err}"));
                self.stored_outcome(reason, progress).await
            }
            Err(store_err) => {
                error!(
                    job_id = %job_id,
                    error = %store_err,
                    reason = %reason,
                    "Failed to persist job failure"
                );
                self.emit(failed_event(
                    job_id,
                    &self.submission.owner_id,
                    &self.submission.group_id,
                    progress,
                    &reason,
                    self.now(),
                ));
                JobOutcome::Failed {
                    reason,
                    progress,
                    persisted: false,
                }
            }
        }
    }

    /// Outcome of a job whose record another party already terminated.
    async fn stored_outcome(&self, reason: String, progress: u8) -> JobOutcome {
        let stored = match self.deps.store.get(&self.submission.job_id).await {
            Ok(Some(record)) => JobOutcome::from_record(&record),
            _ => None,
        };
        stored.unwrap_or(JobOutcome::Failed {
            reason,
            progress,
            persisted: false,
        })
    }

    fn now(&self) -> DateTime<Utc> {
        self.deps.clock.now()
    }

    fn beat(&self, progress: u8) {
        self.heartbeat.send_replace(Heartbeat::now(progress));
    }

    fn emit(&self, event: ProgressEvent) {
        self.deps.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classification, MockClassifier, StaticClassifier};
    use crate::error::ClassificationError;
    use crate::pipeline::Stage;
    use async_trait::async_trait;
    use vguard_models::{JobRecord, MediaMetadata, MediaRef};
    use vguard_notify::{NotificationHub, Subscription};
    use vguard_store::{InMemoryRecordStore, ManualClock, StoreError, StoreResult};

    struct Harness {
        store: Arc<InMemoryRecordStore>,
        clock: Arc<ManualClock>,
        sub: Subscription,
        hub: NotificationHub,
        submission: JobSubmission,
    }

    async fn harness(job: &str) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(InMemoryRecordStore::with_clock(clock.clone()));
        let hub = NotificationHub::default();
        let sub = hub.subscribe("user-1", "org-1");
        let submission = JobSubmission::with_id(
            JobId::from(job),
            "user-1",
            "org-1",
            MediaRef::new("uploads/clip.mp4", "clip.mp4", "video/mp4", 4096),
        );
        store
            .create(JobRecord::from_submission(&submission, clock.now()))
            .await
            .unwrap();
        Harness {
            store,
            clock,
            sub,
            hub,
            submission,
        }
    }

    fn runner(h: &Harness, store: Arc<dyn RecordStore>, classifier: Arc<dyn Classifier>) -> JobRunner {
        let (events, _dispatcher) = h.hub.event_channel();
        let (heartbeat, _) = watch::channel(Heartbeat::now(0));
        JobRunner::new(
            h.submission.clone(),
            RunnerDeps {
                store,
                classifier,
                pipeline: Arc::new(StagePipeline::reference()),
                events,
                stage_delay: Duration::from_secs(1),
                clock: h.clock.clone(),
            },
            CancellationToken::new(),
            heartbeat,
        )
    }

    async fn drain(sub: &mut Subscription, count: usize) -> Vec<ProgressEvent> {
        let mut events = Vec::with_capacity(count);
        for _ in 0..count {
            events.push(sub.recv().await.unwrap());
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_events_and_record() {
        let mut h = harness("job-1").await;
        let outcome = runner(&h, h.store.clone(), Arc::new(StaticClassifier::accepting()))
            .run()
            .await;
        assert_eq!(
            outcome,
            JobOutcome::Completed {
                result_status: ResultStatus::Accepted
            }
        );

        let events = drain(&mut h.sub, 6).await;
        let progress: Vec<u8> = events.iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![20, 40, 60, 80, 95, 100]);
        assert!(events[..5].iter().all(|e| e.state == JobState::Processing));
        assert_eq!(events[0].message.as_deref(), Some("Validating video format..."));
        assert!(events.iter().all(|e| e.timestamp == h.clock.now()));

        let last = &events[5];
        assert_eq!(last.state, JobState::Completed);
        assert_eq!(last.result_status, Some(ResultStatus::Accepted));
        assert_eq!(last.message.as_deref(), Some("Analysis complete. Status: accepted"));

        let record = h.store.get(&JobId::from("job-1")).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.progress, 100);
        assert!(record.failure_reason.is_none());
        assert!(record.result_metadata.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_error_fails_at_last_checkpoint() {
        let mut h = harness("job-2").await;
        let mut classifier = MockClassifier::new();
        classifier
            .expect_classify()
            .times(1)
            .returning(|_| Err(ClassificationError::unavailable("model offline")));

        let outcome = runner(&h, h.store.clone(), Arc::new(classifier)).run().await;
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                reason: "classification failed: classifier unavailable: model offline".into(),
                progress: 95,
                persisted: true,
            }
        );

        let events = drain(&mut h.sub, 6).await;
        let failed: Vec<_> = events.iter().filter(|e| e.state == JobState::Failed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].progress, 95);
        assert!(h.sub.try_recv().is_none());

        let record = h.store.get(&JobId::from("job-2")).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.progress, 95);
        assert_eq!(record.result_status, ResultStatus::Pending);
        assert!(record.result_metadata.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_stage() {
        let mut h = harness("job-3").await;
        let runner = runner(&h, h.store.clone(), Arc::new(StaticClassifier::accepting()));
        runner.cancel.cancel();

        let outcome = runner.run().await;
        assert_eq!(outcome.failure_reason(), Some("cancelled"));

        let event = h.sub.recv().await.unwrap();
        assert_eq!(event.state, JobState::Failed);
        assert_eq!(event.progress, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_tracks_progress() {
        let h = harness("job-4").await;
        let runner = runner(&h, h.store.clone(), Arc::new(StaticClassifier::flagging()));
        let beats = runner.heartbeat.subscribe();

        runner.run().await;
        assert_eq!(beats.borrow().progress, 100);
    }

    /// Store that rejects every write after the first `allow` updates.
    struct FlakyStore {
        inner: InMemoryRecordStore,
        allow: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn create(&self, record: JobRecord) -> StoreResult<()> {
            self.inner.create(record).await
        }

        async fn get(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
            self.inner.get(job_id).await
        }

        async fn atomic_update(&self, job_id: &JobId, update: RecordUpdate) -> StoreResult<JobRecord> {
            use std::sync::atomic::Ordering;
            if self.allow.load(Ordering::SeqCst) == 0 {
                return Err(StoreError::unavailable("connection reset"));
            }
            self.allow.fetch_sub(1, Ordering::SeqCst);
            self.inner.atomic_update(job_id, update).await
        }

        async fn list_unfinished(&self) -> StoreResult<Vec<JobRecord>> {
            self.inner.list_unfinished().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_still_emits_failed_event() {
        let mut h = harness("job-5").await;
        let flaky = Arc::new(FlakyStore {
            inner: InMemoryRecordStore::new(),
            allow: std::sync::atomic::AtomicUsize::new(3),
        });
        flaky
            .create(JobRecord::from_submission(&h.submission, Utc::now()))
            .await
            .unwrap();

        // start, 20 and 40 succeed; the write at 60 and the Failed write do not.
        let outcome = runner(&h, flaky.clone(), Arc::new(StaticClassifier::accepting()))
            .run()
            .await;
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                reason: "record store error: Store unavailable: connection reset".into(),
                progress: 40,
                persisted: false,
            }
        );

        let events = drain(&mut h.sub, 3).await;
        assert_eq!(events[2].state, JobState::Failed);
        assert_eq!(events[2].progress, 40);

        let record = flaky.get(&JobId::from("job-5")).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Processing);
        assert_eq!(record.progress, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_terminated_elsewhere_keeps_stored_outcome() {
        let mut h = harness("job-7").await;
        h.store
            .atomic_update(&JobId::from("job-7"), RecordUpdate::fail("interrupted"))
            .await
            .unwrap();

        let outcome = runner(&h, h.store.clone(), Arc::new(StaticClassifier::accepting()))
            .run()
            .await;
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                reason: "interrupted".into(),
                progress: 0,
                persisted: true,
            }
        );
        let quiet = tokio::time::timeout(Duration::from_secs(1), h.sub.recv()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_pipeline() {
        let mut h = harness("job-6").await;
        let pipeline = StagePipeline::new(vec![
            Stage::checkpoint("scan", 50, "Scanning..."),
            Stage::classify("classify"),
        ])
        .unwrap();
        let (events, _dispatcher) = h.hub.event_channel();
        let (heartbeat, _) = watch::channel(Heartbeat::now(0));
        let classification = Classification::new(ResultStatus::Flagged, MediaMetadata::new());
        let runner = JobRunner::new(
            h.submission.clone(),
            RunnerDeps {
                store: h.store.clone(),
                classifier: Arc::new(StaticClassifier::new(Ok(classification))),
                pipeline: Arc::new(pipeline),
                events,
                stage_delay: Duration::ZERO,
                clock: h.clock.clone(),
            },
            CancellationToken::new(),
            heartbeat,
        );

        assert!(runner.run().await.is_completed());
        let progress: Vec<u8> = drain(&mut h.sub, 2).await.iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![50, 100]);
    }
}
