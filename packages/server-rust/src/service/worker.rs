//! Background worker for periodic and on-demand driver steps.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc channel
//! via a `BackgroundRunnable` implementation, with periodic tick callbacks.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
///
/// Implementors define how individual tasks are processed, what happens on each
/// periodic tick, and how to clean up on shutdown. Calls never overlap.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called periodically (on each tick interval). Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// DriverTask
// ---------------------------------------------------------------------------

/// On-demand requests understood by the topology drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverTask {
    /// Run a step now instead of waiting for the next tick.
    Kick,
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The worker spawns a tokio task that:
/// 1. Listens for tasks on the mpsc channel
/// 2. Calls `BackgroundRunnable::run()` for each task
/// 3. Periodically calls `BackgroundRunnable::on_tick()` at the configured interval,
///    skipping ticks missed while a step was running
/// 4. Calls `BackgroundRunnable::shutdown()` when stopped
pub struct BackgroundWorker<R: BackgroundRunnable> {
    name: &'static str,
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the background worker with the given runnable and tick interval.
    ///
    /// The channel capacity is fixed at 256.
    pub fn start(name: &'static str, mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(256);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
            tracing::debug!(worker = name, "background worker stopped");
        });

        Self {
            name,
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Submit a task to the worker, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("{} worker channel closed", self.name)),
            None => Err(anyhow::anyhow!("{} worker not running", self.name)),
        }
    }

    /// Returns a sender for submitting tasks from other owners, or `None`
    /// once stopped.
    #[must_use]
    pub fn sender(&self) -> Option<mpsc::Sender<R::Task>> {
        self.tx.clone()
    }

    /// Submit a task without waiting. A full channel drops the task, which is
    /// harmless for idempotent wake-ups.
    pub fn try_submit(&self, task: R::Task) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.try_send(task).is_ok())
    }

    /// Stop the worker gracefully, waiting for the current step to complete.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
