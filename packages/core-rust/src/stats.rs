//! Observed state of managed entities.
//!
//! Nothing here is persisted. Pollers overwrite these values every cycle and
//! the status feed reads whatever is current. Health is a closed enum so
//! callers match on it instead of comparing display strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sentinel::SentinelReport;

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Outcome of the most recent poll of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Health<T> {
    /// Never polled yet.
    Pending,
    /// The poll did not finish within its per-entity budget.
    Timeout { timeout_ms: u64 },
    /// The entity answered with an error or could not be reached.
    Error { message: String },
    Healthy { stats: T, unix_ms: u64 },
}

impl<T> Health<T> {
    /// Display label used at the HTTP boundary.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Error { .. } => "ERROR",
            Self::Healthy { .. } => "HEALTHY",
        }
    }

    #[must_use]
    pub fn stats(&self) -> Option<&T> {
        match self {
            Self::Healthy { stats, .. } => Some(stats),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ServerStats
// ---------------------------------------------------------------------------

/// Parsed subset of a storage server's `INFO` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    pub run_id: String,
    /// `None` when the server replicates from nobody.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_addr: Option<String>,
    #[serde(default)]
    pub master_link_up: bool,
    #[serde(default)]
    pub used_memory: u64,
    /// `0` means unlimited.
    #[serde(default)]
    pub maxmemory: u64,
    /// Key count summed over every `dbN` keyspace line.
    #[serde(default)]
    pub keys: u64,
    /// Full INFO map, kept for operators.
    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

impl ServerStats {
    /// Builds stats from the `field -> value` pairs of an INFO reply.
    #[must_use]
    pub fn from_info(info: BTreeMap<String, String>) -> Self {
        let number = |key: &str| {
            info.get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(0)
        };
        let master_addr = match (info.get("master_host"), info.get("master_port")) {
            (Some(host), Some(port)) if !host.is_empty() => Some(format!("{host}:{port}")),
            _ => None,
        };
        let keys = info
            .iter()
            .filter(|(k, _)| is_keyspace_field(k))
            .filter_map(|(_, v)| parse_keyspace_keys(v))
            .sum();
        Self {
            run_id: info.get("run_id").cloned().unwrap_or_default(),
            master_link_up: info.get("master_link_status").is_some_and(|s| s == "up"),
            master_addr,
            used_memory: number("used_memory"),
            maxmemory: number("maxmemory"),
            keys,
            info,
        }
    }

    /// Whether replication matches what the topology expects: a master must
    /// follow nobody, a replica must follow `expected_master` with a live link.
    #[must_use]
    pub fn replication_matches(&self, expected_master: Option<&str>) -> bool {
        match expected_master {
            None => self.master_addr.is_none(),
            Some(m) => self.master_addr.as_deref() == Some(m) && self.master_link_up,
        }
    }
}

fn is_keyspace_field(key: &str) -> bool {
    key.strip_prefix("db")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Extracts `keys` from a line like `keys=12,expires=0,avg_ttl=0`.
fn parse_keyspace_keys(value: &str) -> Option<u64> {
    value
        .split(',')
        .find_map(|pair| pair.strip_prefix("keys="))
        .and_then(|n| n.parse().ok())
}

// ---------------------------------------------------------------------------
// ProxyStats
// ---------------------------------------------------------------------------

/// Subset of a proxy's runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStats {
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub ops_total: u64,
    #[serde(default)]
    pub ops_fails: u64,
    #[serde(default)]
    pub ops_qps: u64,
    #[serde(default)]
    pub sessions_total: u64,
    #[serde(default)]
    pub sessions_alive: u64,
}

// ---------------------------------------------------------------------------
// SentinelStats
// ---------------------------------------------------------------------------

/// What one sentinel reported, plus the summary shown to operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelStats {
    pub report: SentinelReport,
}

/// Aggregated counters over a sentinel's monitored masters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SentinelSummary {
    pub masters: u32,
    pub masters_down: u32,
    pub avg_slaves: f64,
    pub avg_sentinels: f64,
}

impl SentinelStats {
    #[must_use]
    pub fn summary(&self) -> SentinelSummary {
        let masters = &self.report.masters;
        let count = u32::try_from(masters.len()).unwrap_or(u32::MAX);
        let down = u32::try_from(masters.values().filter(|m| !m.status_ok).count()).unwrap_or(0);
        let slaves: u32 = masters.values().map(|m| m.num_slaves).sum();
        let sentinels: u32 = masters.values().map(|m| m.num_other_sentinels).sum();
        let avg = |total: u32| {
            if count == 0 {
                0.0
            } else {
                f64::from(total) / f64::from(count)
            }
        };
        SentinelSummary {
            masters: count,
            masters_down: down,
            avg_slaves: avg(slaves),
            avg_sentinels: avg(sentinels),
        }
    }
}
