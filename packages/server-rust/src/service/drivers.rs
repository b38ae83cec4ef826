//! Topology drivers: the slot migration driver, the replication resync
//! driver and the stats poller, each run by its own [`BackgroundWorker`].
//!
//! A driver step never panics and never holds the topology lock between
//! steps. Failing slot steps are retried with exponential backoff; the slot
//! keeps its state, so a retry resumes where the failed step stopped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::TopomConfig;
use super::worker::{BackgroundRunnable, BackgroundWorker, DriverTask};
use crate::cluster::{Topom, TopomError};

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Earliest time the next step may run after a failure.
#[derive(Debug, Default)]
struct Backoff {
    retry_at: Option<Instant>,
}

impl Backoff {
    fn ready(&self) -> bool {
        self.retry_at.is_none_or(|at| Instant::now() >= at)
    }

    fn defer(&mut self, delay: Duration) {
        self.retry_at = Some(Instant::now() + delay);
    }

    fn reset(&mut self) {
        self.retry_at = None;
    }
}

/// Result of one driver step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Closed, disabled by backoff, or nothing to do.
    Skipped,
    /// Number of actions completed.
    Done(usize),
    Failed,
}

// ---------------------------------------------------------------------------
// SlotActionDriver
// ---------------------------------------------------------------------------

/// Runs slot actions one at a time until none is left.
pub struct SlotActionDriver {
    topom: Arc<Topom>,
    backoff: Backoff,
}

impl SlotActionDriver {
    #[must_use]
    pub fn new(topom: Arc<Topom>) -> Self {
        Self {
            topom,
            backoff: Backoff::default(),
        }
    }

    pub async fn step(&mut self) -> StepOutcome {
        if self.topom.is_closed() || !self.backoff.ready() {
            return StepOutcome::Skipped;
        }
        match self.topom.process_slot_actions().await {
            Ok(0) => {
                self.backoff.reset();
                StepOutcome::Skipped
            }
            Ok(done) => {
                self.backoff.reset();
                info!(done, "slot actions completed");
                StepOutcome::Done(done)
            }
            Err(TopomError::Closed) => StepOutcome::Skipped,
            Err(e) => {
                let config = self.topom.config();
                let failures = self
                    .topom
                    .progress()
                    .record_failure(config.action_failure_threshold);
                let delay = config.backoff(u32::try_from(failures).unwrap_or(u32::MAX));
                self.backoff.defer(delay);
                metrics::counter!("topom_slot_migration_failures_total").increment(1);
                warn!(
                    error = %e,
                    failures,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "slot action step failed"
                );
                StepOutcome::Failed
            }
        }
    }
}

#[async_trait]
impl BackgroundRunnable for SlotActionDriver {
    type Task = DriverTask;

    async fn run(&mut self, _task: DriverTask) {
        self.step().await;
    }

    async fn on_tick(&mut self) {
        self.step().await;
    }
}

// ---------------------------------------------------------------------------
// SyncActionDriver
// ---------------------------------------------------------------------------

/// Re-attaches servers with a pending sync action, oldest first.
pub struct SyncActionDriver {
    topom: Arc<Topom>,
}

impl SyncActionDriver {
    #[must_use]
    pub fn new(topom: Arc<Topom>) -> Self {
        Self { topom }
    }

    /// Drains pending sync actions. A failed action is parked as
    /// `sync_failed` and the next one is tried.
    pub async fn step(&mut self) -> StepOutcome {
        if self.topom.is_closed() {
            return StepOutcome::Skipped;
        }
        let mut done = 0;
        let mut failed = false;
        loop {
            match self.topom.process_sync_action().await {
                Ok(Some(_)) => done += 1,
                Ok(None) => break,
                Err(TopomError::External { .. } | TopomError::Timeout { .. }) => {
                    metrics::counter!("topom_sync_action_failures_total").increment(1);
                    failed = true;
                }
                Err(e) => {
                    warn!(error = %e, "sync action step failed");
                    return StepOutcome::Failed;
                }
            }
        }
        match (done, failed) {
            (_, true) => StepOutcome::Failed,
            (0, false) => StepOutcome::Skipped,
            (n, false) => StepOutcome::Done(n),
        }
    }
}

#[async_trait]
impl BackgroundRunnable for SyncActionDriver {
    type Task = DriverTask;

    async fn run(&mut self, _task: DriverTask) {
        self.step().await;
    }

    async fn on_tick(&mut self) {
        self.step().await;
    }
}

// ---------------------------------------------------------------------------
// StatsPoller
// ---------------------------------------------------------------------------

/// Refreshes the stats cache once per tick.
pub struct StatsPoller {
    topom: Arc<Topom>,
}

impl StatsPoller {
    #[must_use]
    pub fn new(topom: Arc<Topom>) -> Self {
        Self { topom }
    }
}

#[async_trait]
impl BackgroundRunnable for StatsPoller {
    type Task = DriverTask;

    async fn run(&mut self, _task: DriverTask) {
        self.topom.refresh_stats().await;
    }

    async fn on_tick(&mut self) {
        self.topom.refresh_stats().await;
        debug!("stats refreshed");
    }
}

// ---------------------------------------------------------------------------
// Kicker
// ---------------------------------------------------------------------------

/// Cloneable handle that wakes the action drivers without owning them.
#[derive(Debug, Clone, Default)]
pub struct Kicker {
    senders: Vec<mpsc::Sender<DriverTask>>,
}

impl Kicker {
    /// Requests an immediate step. Wake-ups to a busy or stopped driver are dropped.
    pub fn kick(&self) {
        for tx in &self.senders {
            let _ = tx.try_send(DriverTask::Kick);
        }
    }
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

/// Handles of every running driver.
pub struct Drivers {
    slots: BackgroundWorker<SlotActionDriver>,
    syncs: BackgroundWorker<SyncActionDriver>,
    stats: BackgroundWorker<StatsPoller>,
}

impl Drivers {
    #[must_use]
    pub fn start(topom: &Arc<Topom>, config: &TopomConfig) -> Self {
        Self {
            slots: BackgroundWorker::start(
                "slot-actions",
                SlotActionDriver::new(Arc::clone(topom)),
                Duration::from_millis(config.slot_action_tick_ms),
            ),
            syncs: BackgroundWorker::start(
                "sync-actions",
                SyncActionDriver::new(Arc::clone(topom)),
                Duration::from_millis(config.sync_action_tick_ms),
            ),
            stats: BackgroundWorker::start(
                "stats",
                StatsPoller::new(Arc::clone(topom)),
                Duration::from_millis(config.stats_interval_ms),
            ),
        }
    }

    /// Handle for waking the action drivers, e.g. right after actions were created.
    #[must_use]
    pub fn kicker(&self) -> Kicker {
        Kicker {
            senders: [self.slots.sender(), self.syncs.sender()]
                .into_iter()
                .flatten()
                .collect(),
        }
    }

    /// Asks the stats poller for an immediate cycle.
    pub fn refresh_stats(&self) {
        self.stats.try_submit(DriverTask::Kick);
    }

    /// Stops every driver, letting a running step finish.
    pub async fn stop(&mut self) {
        self.slots.stop().await;
        self.syncs.stop().await;
        self.stats.stop().await;
        info!("drivers stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
