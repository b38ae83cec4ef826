//! Wire types of the admin status feed and admin command responses.
//!
//! A [`StatusFeed`] is built from exactly one snapshot plus the stats caches,
//! so every id it mentions resolves inside the same document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::group::Group;
use crate::proxy::Proxy;
use crate::sentinel::{RunIdMismatch, SentinelModel};
use crate::slot::SlotMapping;
use crate::stats::{Health, ProxyStats, SentinelStats, SentinelSummary, ServerStats};

// ---------------------------------------------------------------------------
// HaStatus
// ---------------------------------------------------------------------------

/// Agreement between a server's logical role and the sentinel-reported master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaStatus {
    /// No sentinel reports a master for the group.
    Undefined,
    /// Logical master, also the reported master.
    Master,
    /// Logical master, but sentinels report another server.
    NotMaster,
    /// Logical replica that sentinels report as master.
    RealMaster,
    /// Logical replica, not the reported master.
    Slave,
}

impl HaStatus {
    /// Classifies the server at `index` given the reported master of its group.
    #[must_use]
    pub fn classify(index: usize, addr: &str, reported_master: Option<&str>) -> Self {
        match reported_master {
            None => Self::Undefined,
            Some(m) if index == 0 && m == addr => Self::Master,
            Some(_) if index == 0 => Self::NotMaster,
            Some(m) if m == addr => Self::RealMaster,
            Some(_) => Self::Slave,
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Derived per-server view rendered next to the group models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    #[serde(flatten)]
    pub health: Health<ServerStats>,
    pub ha_status: HaStatus,
    /// Replication agrees with the logical layout; `None` until polled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_ok: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSection {
    pub models: Vec<Group>,
    /// Keyed by server address.
    pub stats: BTreeMap<String, ServerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxySection {
    pub models: Vec<Proxy>,
    /// Keyed by proxy token.
    pub stats: BTreeMap<String, Health<ProxyStats>>,
}

/// Migration driver progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotActionProgress {
    /// Keys left in the slot being migrated.
    pub remain: u64,
    /// Set after repeated failures; cleared by the next successful step.
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotActionSection {
    pub interval: u64,
    pub disabled: bool,
    pub progress: SlotActionProgress,
    /// Slot currently owned by the driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<u32>,
}

/// Per-sentinel status line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelStatus {
    #[serde(flatten)]
    pub health: Health<SentinelStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SentinelSummary>,
    /// Every run id divergence found on the last pass, sorted.
    #[serde(default)]
    pub runid_errors: Vec<RunIdMismatch>,
    /// First divergence plus a count of the rest; empty when consistent.
    #[serde(default)]
    pub runid_error: String,
}

impl SentinelStatus {
    /// Renders the one-line diagnostic for a sorted list of mismatches.
    #[must_use]
    pub fn render_runid_error(mismatches: &[RunIdMismatch]) -> String {
        match mismatches {
            [] => String::new(),
            [only] => only.to_string(),
            [first, rest @ ..] => format!("{first} (+{} more)", rest.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelSection {
    pub model: SentinelModel,
    /// Keyed by sentinel address.
    pub stats: BTreeMap<String, SentinelStatus>,
    /// Group masters as reported by the sentinels.
    pub masters: BTreeMap<u32, String>,
}

// ---------------------------------------------------------------------------
// StatusFeed
// ---------------------------------------------------------------------------

/// Complete admin status document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusFeed {
    /// Snapshot version mutations must quote for optimistic concurrency.
    pub version: u64,
    pub closed: bool,
    pub product_name: String,
    pub slots: Vec<SlotMapping>,
    pub group: GroupSection,
    pub proxy: ProxySection,
    pub slot_action: SlotActionSection,
    pub sentinels: SentinelSection,
}

// ---------------------------------------------------------------------------
// Admin command replies
// ---------------------------------------------------------------------------

/// Successful admin command reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    /// Version of the snapshot after the command.
    pub version: u64,
}

/// Structured admin command failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable category, e.g. `validation` or `conflict`.
    pub kind: String,
    pub message: String,
    /// Current snapshot version, so the caller can retry with a fresh read.
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}
