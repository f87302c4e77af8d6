//! Engine facade: the surface an upload or API layer talks to.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use vguard_models::{JobId, JobRecord, JobSubmission, MediaRef};
use vguard_notify::{NotificationHub, Subscription};
use vguard_store::{Clock, InMemoryRecordStore, RecordStore, SystemClock};

use crate::classifier::{Classifier, SimulatedClassifier};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::StagePipeline;
use crate::runner::RunnerDeps;
use crate::scheduler::{JobScheduler, RunnerHandle};
use crate::watchdog::StaleJobDetector;

/// Builder for [`Engine`]. Unset collaborators fall back to the in-memory
/// store, the simulated classifier, the system clock and the reference
/// pipeline.
pub struct EngineBuilder {
    config: WorkerConfig,
    store: Option<Arc<dyn RecordStore>>,
    classifier: Option<Arc<dyn Classifier>>,
    clock: Option<Arc<dyn Clock>>,
    pipeline: Option<StagePipeline>,
}

impl EngineBuilder {
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Clock used for record timestamps and stale record detection. A custom
    /// store should stamp records with the same clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn pipeline(mut self, pipeline: StagePipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Assemble the engine. Must be called inside a Tokio runtime, since it
    /// spawns the event dispatcher.
    pub fn build(self) -> Engine {
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store: Arc<dyn RecordStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryRecordStore::with_clock(clock.clone())),
        };
        let classifier: Arc<dyn Classifier> = match self.classifier {
            Some(classifier) => classifier,
            None => Arc::new(SimulatedClassifier::new(self.config.flag_threshold)),
        };
        let pipeline = self.pipeline.unwrap_or_default();

        let hub = NotificationHub::new(self.config.subscriber_buffer);
        // The dispatcher stops on its own once the scheduler is dropped.
        let (events, _dispatcher) = hub.event_channel();

        let deps = RunnerDeps {
            store: store.clone(),
            classifier,
            pipeline: Arc::new(pipeline),
            events,
            stage_delay: self.config.stage_delay,
            clock,
        };
        let scheduler = JobScheduler::new(deps, &self.config);

        Engine {
            config: self.config,
            scheduler,
            hub,
            store,
            background: CancellationToken::new(),
            watchdog: Mutex::new(None),
        }
    }
}

/// Job processing and progress notification engine.
pub struct Engine {
    config: WorkerConfig,
    scheduler: JobScheduler,
    hub: NotificationHub,
    store: Arc<dyn RecordStore>,
    background: CancellationToken,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn builder(config: WorkerConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            store: None,
            classifier: None,
            clock: None,
            pipeline: None,
        }
    }

    /// Recover jobs left behind by a previous process and start the watchdog.
    ///
    /// Returns the number of recovered jobs.
    pub async fn start(&self) -> WorkerResult<usize> {
        let recovered = self.scheduler.recover_interrupted().await?;

        let detector = self.detector();
        if detector.is_enabled() {
            let shutdown = self.background.clone();
            let handle = tokio::spawn(async move { detector.run(shutdown).await });
            *self.watchdog.lock().await = Some(handle);
        }

        info!(recovered, "Engine started");
        Ok(recovered)
    }

    /// Accept an uploaded file for moderation.
    pub async fn submit(
        &self,
        job_id: JobId,
        owner_id: impl Into<String>,
        group_id: impl Into<String>,
        media: MediaRef,
    ) -> WorkerResult<RunnerHandle> {
        self.scheduler
            .submit(JobSubmission::with_id(job_id, owner_id, group_id, media))
            .await
    }

    pub async fn get_record(&self, job_id: &JobId) -> WorkerResult<JobRecord> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| WorkerError::NotFound(job_id.clone()))
    }

    /// Live progress events for an owner within a group.
    ///
    /// The caller must have authorized the pair.
    pub fn subscribe(&self, owner_id: impl Into<String>, group_id: impl Into<String>) -> Subscription {
        self.hub.subscribe(owner_id, group_id)
    }

    pub async fn cancel(&self, job_id: &JobId) -> bool {
        self.scheduler.cancel(job_id).await
    }

    pub async fn active_jobs(&self) -> HashSet<JobId> {
        self.scheduler.active_jobs().await
    }

    /// Stop the watchdog and drain the scheduler.
    ///
    /// Returns how many jobs were interrupted.
    pub async fn shutdown(&self) -> usize {
        self.background.cancel();
        if let Some(handle) = self.watchdog.lock().await.take() {
            let _ = handle.await;
        }
        self.scheduler.shutdown().await
    }

    /// A detector over this engine's scheduler, for manual sweeps.
    pub fn detector(&self) -> StaleJobDetector {
        StaleJobDetector::new(self.scheduler.clone(), &self.config)
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::StaticClassifier;
    use vguard_models::JobState;

    fn media() -> MediaRef {
        MediaRef::new("uploads/clip.mp4", "clip.mp4", "video/mp4", 4096)
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_record_not_found() {
        let engine = Engine::builder(WorkerConfig::default()).build();
        let err = engine.get_record(&JobId::from("missing")).await.unwrap_err();
        assert!(matches!(err, WorkerError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_and_reconcile_from_record() {
        let engine = Engine::builder(WorkerConfig::default())
            .classifier(Arc::new(StaticClassifier::accepting()))
            .build();

        let mut handle = engine
            .submit(JobId::from("job-1"), "user-1", "org-1", media())
            .await
            .unwrap();
        let record = engine.get_record(&JobId::from("job-1")).await.unwrap();
        assert!(!record.is_terminal());
        assert!(engine.active_jobs().await.contains(&JobId::from("job-1")));

        assert!(handle.wait().await.is_completed());
        let record = engine.get_record(&JobId::from("job-1")).await.unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.progress, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown_with_watchdog() {
        let engine = Engine::builder(WorkerConfig::default()).build();
        assert_eq!(engine.start().await.unwrap(), 0);
        assert_eq!(engine.shutdown().await, 0);

        let err = engine
            .submit(JobId::from("late"), "user-1", "org-1", media())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::ShuttingDown));
    }
}
