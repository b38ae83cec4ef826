//! Cluster orchestration types: configuration and driver progress.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use topom_core::{SlotActionProgress, DEFAULT_SLOT_COUNT};

// ---------------------------------------------------------------------------
// ClusterConfig
// ---------------------------------------------------------------------------

/// Settings of the orchestrator core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster name; sentinel group names are `{product_name}-{gid}`.
    pub product_name: String,
    /// Shared secret of servers and proxies. Never serialized back out.
    #[serde(skip_serializing)]
    pub product_auth: String,
    /// Slot count used when no persisted snapshot exists.
    pub slot_count: u32,
    /// Budget of one call to a managed server, proxy or sentinel.
    pub external_timeout_ms: u64,
    /// Budget of one stats poll of one entity.
    pub stats_timeout_ms: u64,
    /// Reorder a group when sentinels report one of its replicas as master.
    pub follow_failover: bool,
    /// Consecutive driver failures before `progress.failed` is raised.
    pub action_failure_threshold: u32,
    /// First retry delay of a failing driver; doubles up to the cap.
    pub action_backoff_base_ms: u64,
    pub action_backoff_max_ms: u64,
    pub sentinel: MonitorConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            product_name: "topom-demo".to_string(),
            product_auth: String::new(),
            slot_count: DEFAULT_SLOT_COUNT,
            external_timeout_ms: 5_000,
            stats_timeout_ms: 2_000,
            follow_failover: true,
            action_failure_threshold: 3,
            action_backoff_base_ms: 1_000,
            action_backoff_max_ms: 30_000,
            sentinel: MonitorConfig::default(),
        }
    }
}

impl ClusterConfig {
    #[must_use]
    pub fn external_timeout(&self) -> Duration {
        Duration::from_millis(self.external_timeout_ms)
    }

    #[must_use]
    pub fn stats_timeout(&self) -> Duration {
        Duration::from_millis(self.stats_timeout_ms)
    }

    /// Retry delay after `failures` consecutive failures (`failures >= 1`).
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        let ms = self
            .action_backoff_base_ms
            .saturating_mul(1u64 << shift)
            .min(self.action_backoff_max_ms);
        Duration::from_millis(ms)
    }
}

/// Parameters passed to sentinels when they start monitoring a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub quorum: u32,
    pub parallel_syncs: u32,
    pub down_after_ms: u64,
    pub failover_timeout_ms: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notification_script: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_reconfig_script: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            quorum: 2,
            parallel_syncs: 1,
            down_after_ms: 30_000,
            failover_timeout_ms: 300_000,
            notification_script: String::new(),
            client_reconfig_script: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionProgress
// ---------------------------------------------------------------------------

/// Live progress of the slot migration driver.
///
/// Written by the driver task, read lock-free by the status feed.
#[derive(Debug, Default)]
pub struct ActionProgress {
    remain: AtomicU64,
    failed: AtomicBool,
    /// Slot id being migrated, or `-1`.
    executor: AtomicI64,
    consecutive_failures: AtomicU64,
}

impl ActionProgress {
    #[must_use]
    pub fn new() -> Self {
        Self {
            executor: AtomicI64::new(-1),
            ..Self::default()
        }
    }

    /// Records a completed migration step.
    pub fn record_step(&self, remain: u64) {
        self.remain.store(remain, Ordering::Relaxed);
        self.failed.store(false, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Records a failed step; raises `failed` once `threshold` is reached.
    /// Returns the number of consecutive failures.
    pub fn record_failure(&self, threshold: u32) -> u64 {
        let n = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if n >= u64::from(threshold.max(1)) {
            self.failed.store(true, Ordering::Relaxed);
        }
        n
    }

    pub fn set_executor(&self, sid: Option<u32>) {
        self.executor
            .store(sid.map_or(-1, i64::from), Ordering::Relaxed);
    }

    #[must_use]
    pub fn executor(&self) -> Option<u32> {
        u32::try_from(self.executor.load(Ordering::Relaxed)).ok()
    }

    #[must_use]
    pub fn snapshot(&self) -> SlotActionProgress {
        SlotActionProgress {
            remain: self.remain.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
