//! Job scheduler: admission, runner registry and forced termination.
//!
//! The registry holds one entry per job with a live runner. An entry is
//! inserted under the registry lock before the record is created, so two
//! concurrent submissions of the same ID can never both start a runner.
//! Whoever removes an entry (the runner finishing, the watchdog, or shutdown)
//! is responsible for publishing the job's outcome.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vguard_models::{JobId, JobRecord, JobSubmission, ProgressEvent};
use vguard_store::{Clock, RecordUpdate, StoreError};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::runner::{failed_event, Heartbeat, JobOutcome, JobRunner, RunnerDeps};

/// Caller's handle to a submitted job.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    job_id: JobId,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<JobOutcome>>,
}

impl RunnerHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Ask the runner to stop at the next stage boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The outcome, if the job already ended.
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait until the job ends, however it ends.
    pub async fn wait(&mut self) -> JobOutcome {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or_else(lost_outcome),
            Err(_) => lost_outcome(),
        }
    }
}

fn lost_outcome() -> JobOutcome {
    JobOutcome::Failed {
        reason: WorkerError::Interrupted.failure_reason(),
        progress: 0,
        persisted: false,
    }
}

struct ActiveRunner {
    owner_id: String,
    group_id: String,
    cancel: CancellationToken,
    heartbeat: watch::Receiver<Heartbeat>,
    outcome: watch::Sender<Option<JobOutcome>>,
    /// `None` while the submission is still being admitted.
    task: Option<JoinHandle<()>>,
}

impl ActiveRunner {
    fn last_progress(&self) -> u8 {
        self.heartbeat.borrow().progress
    }
}

/// Where to send a Failed event when the record cannot be read back.
struct EventTarget {
    owner_id: String,
    group_id: String,
    progress: u8,
}

struct SchedulerInner {
    deps: RunnerDeps,
    watchdog_interval: Duration,
    shutdown_timeout: Duration,
    registry: Mutex<HashMap<JobId, ActiveRunner>>,
    closing: CancellationToken,
}

impl SchedulerInner {
    /// Publish the runner's own outcome, unless someone else already
    /// terminated the job.
    async fn finish(&self, job_id: &JobId, outcome: JobOutcome) {
        let entry = {
            let mut registry = self.registry.lock().await;
            let entry = registry.remove(job_id);
            metrics::set_active_jobs(registry.len());
            entry
        };
        match entry {
            Some(entry) => {
                debug!(job_id = %job_id, "Runner finished");
                entry.outcome.send_replace(Some(outcome));
            }
            None => debug!(job_id = %job_id, "Runner finished after forced termination"),
        }
    }

    /// Abort a removed runner and fail its record.
    ///
    /// An entry still being admitted has no task yet. Its record may not exist,
    /// so `submit` fails it once the create returns.
    async fn abort_and_fail(&self, job_id: JobId, entry: ActiveRunner, err: WorkerError) {
        entry.cancel.cancel();
        if entry.task.is_none() {
            debug!(job_id = %job_id, "Dropped submission still being admitted");
            return;
        }
        let target = EventTarget {
            progress: entry.last_progress(),
            owner_id: entry.owner_id,
            group_id: entry.group_id,
        };
        if let Some(task) = entry.task {
            task.abort();
            let _ = task.await;
        }

        let (outcome, written) = self.fail_record(&job_id, &err, Some(target)).await;
        if written {
            metrics::record_recovered(err.kind());
        }
        entry.outcome.send_replace(Some(outcome));
    }

    /// Write a Failed transition and emit its event.
    ///
    /// Returns the resulting outcome and whether this call wrote it.
    async fn fail_record(
        &self,
        job_id: &JobId,
        err: &WorkerError,
        target: Option<EventTarget>,
    ) -> (JobOutcome, bool) {
        let reason = err.failure_reason();
        let fallback_progress = target.as_ref().map(|t| t.progress).unwrap_or(0);

        match self
            .deps
            .store
            .atomic_update(job_id, RecordUpdate::fail(reason.clone()))
            .await
        {
            Ok(record) => {
                warn!(
                    job_id = %job_id,
                    owner_id = %record.owner_id,
                    progress = record.progress,
                    reason = %reason,
                    "Marked job failed"
                );
                metrics::record_failed(err.kind());
                let event = ProgressEvent::from_record(&record, self.deps.clock.now());
                self.deps.events.send(event.with_message(reason.as_str()));
                let outcome = JobOutcome::Failed {
                    reason,
                    progress: record.progress,
                    persisted: true,
                };
                (outcome, true)
            }
            Err(store_err) if store_err.is_terminal_conflict() => {
                debug!(job_id = %job_id, "Job reached a terminal state first");
                let outcome = match self.deps.store.get(job_id).await {
                    Ok(Some(record)) => JobOutcome::from_record(&record),
                    _ => None,
                };
                let outcome = outcome.unwrap_or(JobOutcome::Failed {
                    reason,
                    progress: fallback_progress,
                    persisted: false,
                });
                (outcome, false)
            }
            Err(store_err) => {
                error!(
                    job_id = %job_id,
                    error = %store_err,
                    reason = %reason,
                    "Failed to persist job failure"
                );
                if let Some(target) = target {
                    self.deps.events.send(failed_event(
                        job_id,
                        &target.owner_id,
                        &target.group_id,
                        target.progress,
                        &reason,
                        self.deps.clock.now(),
                    ));
                }
                let outcome = JobOutcome::Failed {
                    reason,
                    progress: fallback_progress,
                    persisted: false,
                };
                (outcome, false)
            }
        }
    }

    /// Fail every non-terminal record without a live runner that matches
    /// `is_stale`.
    async fn fail_orphans<F>(&self, err: WorkerError, is_stale: F) -> WorkerResult<usize>
    where
        F: Fn(&JobRecord) -> bool,
    {
        let mut failed = 0;

        for record in self.deps.store.list_unfinished().await? {
            if !is_stale(&record) {
                continue;
            }
            // Registry entries precede record creation, so a listed record
            // whose runner is live is always found here.
            if self.registry.lock().await.contains_key(&record.id) {
                continue;
            }
            warn!(
                job_id = %record.id,
                owner_id = %record.owner_id,
                state = %record.state,
                updated_at = %record.updated_at,
                "Found job record without a runner"
            );
            let target = EventTarget {
                owner_id: record.owner_id.clone(),
                group_id: record.group_id.clone(),
                progress: record.progress,
            };
            let (_, written) = self.fail_record(&record.id, &err, Some(target)).await;
            if written {
                metrics::record_recovered(err.kind());
                failed += 1;
            }
        }
        Ok(failed)
    }
}

/// Admits jobs and owns their runner tasks.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    pub fn new(deps: RunnerDeps, config: &WorkerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                deps,
                watchdog_interval: config.watchdog_interval,
                shutdown_timeout: config.shutdown_timeout,
                registry: Mutex::new(HashMap::new()),
                closing: CancellationToken::new(),
            }),
        }
    }

    /// Create the job's record and start its runner.
    ///
    /// Returns as soon as the runner is spawned.
    pub async fn submit(&self, submission: JobSubmission) -> WorkerResult<RunnerHandle> {
        let job_id = submission.job_id.clone();
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let (heartbeat_tx, heartbeat_rx) = watch::channel(Heartbeat::now(0));

        {
            let mut registry = self.inner.registry.lock().await;
            if self.inner.closing.is_cancelled() {
                metrics::record_rejected(WorkerError::ShuttingDown.kind());
                return Err(WorkerError::ShuttingDown);
            }
            if registry.contains_key(&job_id) {
                warn!(job_id = %job_id, "Rejected duplicate submission");
                metrics::record_rejected("duplicate");
                return Err(WorkerError::DuplicateJob(job_id));
            }
            registry.insert(
                job_id.clone(),
                ActiveRunner {
                    owner_id: submission.owner_id.clone(),
                    group_id: submission.group_id.clone(),
                    cancel: cancel.clone(),
                    heartbeat: heartbeat_rx,
                    outcome: outcome_tx,
                    task: None,
                },
            );
            metrics::set_active_jobs(registry.len());
        }

        let record = JobRecord::from_submission(&submission, self.inner.deps.clock.now());
        if let Err(err) = self.inner.deps.store.create(record).await {
            let mut registry = self.inner.registry.lock().await;
            registry.remove(&job_id);
            metrics::set_active_jobs(registry.len());

            let err = match err {
                StoreError::AlreadyExists(id) => WorkerError::AlreadyRecorded(id),
                other => WorkerError::Store(other),
            };
            warn!(job_id = %job_id, error = %err, "Rejected submission");
            metrics::record_rejected(err.kind());
            return Err(err);
        }

        let runner = JobRunner::new(
            submission,
            self.inner.deps.clone(),
            cancel.clone(),
            heartbeat_tx,
        );

        let spawned = {
            let mut registry = self.inner.registry.lock().await;
            match registry.get_mut(&job_id) {
                Some(entry) => {
                    let inner = Arc::clone(&self.inner);
                    let task_job_id = job_id.clone();
                    entry.task = Some(tokio::spawn(async move {
                        let outcome = match AssertUnwindSafe(runner.run()).catch_unwind().await {
                            Ok(outcome) => outcome,
                            Err(_) => {
                                error!(job_id = %task_job_id, "Job runner panicked");
                                let err = WorkerError::Interrupted;
                                inner.fail_record(&task_job_id, &err, None).await.0
                            }
                        };
                        inner.finish(&task_job_id, outcome).await;
                    }));
                    true
                }
                None => false,
            }
        };

        if !spawned {
            // Shutdown drained the entry while the record was being created.
            self.inner
                .fail_record(&job_id, &WorkerError::Interrupted, None)
                .await;
            return Err(WorkerError::ShuttingDown);
        }

        metrics::record_submitted();
        info!(job_id = %job_id, "Job submitted");

        Ok(RunnerHandle {
            job_id,
            cancel,
            outcome: outcome_rx,
        })
    }

    /// Signal a job's runner to stop at its next stage boundary.
    ///
    /// Returns whether an active runner was signalled.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        match self.inner.registry.lock().await.get(job_id) {
            Some(entry) => {
                info!(job_id = %job_id, "Cancelling job");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Jobs with a live runner.
    pub async fn active_jobs(&self) -> HashSet<JobId> {
        self.inner.registry.lock().await.keys().cloned().collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.closing.is_cancelled()
    }

    /// Abort runners whose last stage completed more than the watchdog
    /// interval ago and mark them Failed `timeout`.
    pub async fn fail_stalled_runners(&self) -> usize {
        let now = Instant::now();
        let interval = self.inner.watchdog_interval;

        let stalled: Vec<(JobId, ActiveRunner)> = {
            let mut registry = self.inner.registry.lock().await;
            let ids: Vec<JobId> = registry
                .iter()
                .filter(|(_, entry)| {
                    entry.task.is_some()
                        && now.saturating_duration_since(entry.heartbeat.borrow().at) > interval
                })
                .map(|(id, _)| id.clone())
                .collect();
            let stalled = ids
                .into_iter()
                .filter_map(|id| registry.remove_entry(&id))
                .collect();
            metrics::set_active_jobs(registry.len());
            stalled
        };

        let count = stalled.len();
        for (job_id, entry) in stalled {
            warn!(
                job_id = %job_id,
                owner_id = %entry.owner_id,
                progress = entry.last_progress(),
                "Detected stalled runner (no stage completed)"
            );
            self.inner.abort_and_fail(job_id, entry, WorkerError::Timeout).await;
        }
        count
    }

    /// Fail non-terminal records with no live runner that have not been
    /// updated for longer than the watchdog interval.
    pub async fn fail_stale_records(&self) -> WorkerResult<usize> {
        let now = self.inner.deps.clock.now();
        let interval = self.inner.watchdog_interval;
        self.inner
            .fail_orphans(WorkerError::Timeout, |record| {
                matches!((now - record.updated_at).to_std(), Ok(age) if age > interval)
            })
            .await
    }

    /// Mark every non-terminal record left behind by a previous process as
    /// Failed `interrupted`. Run once at startup before accepting jobs.
    pub async fn recover_interrupted(&self) -> WorkerResult<usize> {
        let recovered = self
            .inner
            .fail_orphans(WorkerError::Interrupted, |_| true)
            .await?;
        if recovered > 0 {
            info!(recovered, "Recovered interrupted jobs");
        }
        Ok(recovered)
    }

    /// Stop admitting jobs and drain in-flight runners.
    ///
    /// Runners still going after the shutdown timeout are aborted and marked
    /// Failed `interrupted`. Returns how many were aborted.
    pub async fn shutdown(&self) -> usize {
        self.inner.closing.cancel();

        let pending: Vec<watch::Receiver<Option<JobOutcome>>> = {
            let registry = self.inner.registry.lock().await;
            registry.values().map(|entry| entry.outcome.subscribe()).collect()
        };

        if !pending.is_empty() {
            info!(
                jobs = pending.len(),
                timeout = ?self.inner.shutdown_timeout,
                "Waiting for in-flight jobs"
            );
            let drain = join_all(pending.into_iter().map(|mut rx| async move {
                let _ = rx.wait_for(Option::is_some).await;
            }));
            if tokio::time::timeout(self.inner.shutdown_timeout, drain).await.is_err() {
                warn!("Shutdown timeout reached, aborting remaining jobs");
            }
        }

        let leftovers: Vec<(JobId, ActiveRunner)> = {
            let mut registry = self.inner.registry.lock().await;
            let leftovers = registry.drain().collect();
            metrics::set_active_jobs(0);
            leftovers
        };

        let aborted = leftovers.len();
        for (job_id, entry) in leftovers {
            warn!(job_id = %job_id, "Interrupting job at shutdown");
            self.inner
                .abort_and_fail(job_id, entry, WorkerError::Interrupted)
                .await;
        }
        info!(aborted, "Scheduler stopped");
        aborted
    }
}
