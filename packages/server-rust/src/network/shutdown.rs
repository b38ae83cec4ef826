//! Process lifecycle and the admin command gate.
//!
//! Commands are admitted through [`ShutdownController::admit_command`], which
//! counts them before checking the state; a drain that observes zero running
//! commands can therefore never be overtaken by a late admission. The count
//! lives in a `watch` channel so the drain wakes as soon as it reaches zero.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Process health state: Starting -> Ready -> Draining -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Topology loaded, listener not serving yet.
    Starting,
    Ready,
    /// Shutdown started; reads are served, new commands are refused.
    Draining,
    /// Every accepted command has finished.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    fn accepts_commands(self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}

#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    /// Admitted commands that have not finished.
    running: Arc<watch::Sender<u64>>,
    health_state: ArcSwap<HealthState>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shutdown_signal: watch::channel(false).0,
            running: Arc::new(watch::channel(0).0),
            health_state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Receiver flipped to `true` once shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Moves to `Draining` and signals every receiver. Idempotent.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        self.shutdown_signal.send_replace(true);
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Whether new admin commands may start.
    #[must_use]
    pub fn accepts_commands(&self) -> bool {
        self.health_state().accepts_commands()
    }

    /// Admits one command, or `None` once draining has begun. The command
    /// counts as running until the guard is dropped.
    #[must_use]
    pub fn admit_command(&self) -> Option<InFlightGuard> {
        self.running.send_modify(|n| *n += 1);
        let guard = InFlightGuard {
            running: Arc::clone(&self.running),
        };
        self.accepts_commands().then_some(guard)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        *self.running.borrow()
    }

    /// Waits for admitted commands to finish, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` when drained; on timeout the
    /// state stays `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let mut running = self.running.subscribe();
        let drained = tokio::time::timeout(timeout, running.wait_for(|n| *n == 0)).await;
        if matches!(drained, Ok(Ok(_))) {
            self.health_state.store(Arc::new(HealthState::Stopped));
            true
        } else {
            false
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one admitted command as finished when dropped, including on unwind.
#[derive(Debug)]
pub struct InFlightGuard {
    running: Arc<watch::Sender<u64>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.running.send_modify(|n| *n = n.saturating_sub(1));
    }
}
