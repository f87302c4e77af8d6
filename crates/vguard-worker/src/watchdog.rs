//! Background service for detecting and recovering stale jobs.
//!
//! Each sweep:
//! - aborts runners that have not completed a stage within the watchdog
//!   interval and marks them Failed `timeout`
//! - fails non-terminal records that have no runner and have not been
//!   updated within the interval (crashed runners, lost Failed writes)

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::scheduler::JobScheduler;

/// Floor for the sweep period; `interval` panics on a zero period.
pub const MIN_WATCHDOG_TICK: Duration = Duration::from_secs(1);

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub stalled_runners: usize,
    pub orphaned_records: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.stalled_runners + self.orphaned_records
    }
}

/// Stale job detector service.
pub struct StaleJobDetector {
    scheduler: JobScheduler,
    tick: Duration,
    enabled: bool,
}

impl StaleJobDetector {
    pub fn new(scheduler: JobScheduler, config: &WorkerConfig) -> Self {
        Self {
            scheduler,
            tick: config.watchdog_tick.max(MIN_WATCHDOG_TICK),
            enabled: config.stale_detection_enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run the detection loop until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.enabled {
            info!("Stale job detection is disabled");
            return;
        }

        info!("Starting stale job detector (interval: {:?})", self.tick);

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.check_once().await {
                        error!("Stale job detection error: {}", e);
                    }
                }
            }
        }

        info!("Stale job detector stopped");
    }

    /// Run a single sweep.
    pub async fn check_once(&self) -> WorkerResult<SweepReport> {
        let report = SweepReport {
            stalled_runners: self.scheduler.fail_stalled_runners().await,
            orphaned_records: self.scheduler.fail_stale_records().await?,
        };

        if report.total() > 0 {
            info!(
                stalled = report.stalled_runners,
                orphaned = report.orphaned_records,
                "Stale job detection complete"
            );
        }
        Ok(report)
    }
}
