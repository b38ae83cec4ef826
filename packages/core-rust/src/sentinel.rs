//! Sentinel membership and reported views.
//!
//! The sentinel quorum is external: the cluster only stores which sentinel
//! addresses it manages ([`SentinelModel`]) and consumes what each of them
//! reports about the monitored groups ([`SentinelReport`]).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel membership stored in the topology snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelModel {
    #[serde(default)]
    pub servers: Vec<String>,
    /// Membership or monitored masters changed since the last resync.
    #[serde(default)]
    pub out_of_sync: bool,
}

// ---------------------------------------------------------------------------
// Reported view
// ---------------------------------------------------------------------------

/// A server as seen by a sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelNode {
    pub addr: String,
    /// Empty when the sentinel has not learned the run id yet.
    #[serde(default)]
    pub runid: String,
}

/// Master and replicas a sentinel tracks for one group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelGroupView {
    pub master: SentinelNode,
    #[serde(default)]
    pub slaves: Vec<SentinelNode>,
}

impl SentinelGroupView {
    /// All nodes in the view, master first.
    pub fn nodes(&self) -> impl Iterator<Item = &SentinelNode> {
        std::iter::once(&self.master).chain(self.slaves.iter())
    }
}

/// Summary line for one monitored master (`SENTINEL MASTERS` row).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredMaster {
    pub addr: String,
    /// `false` when the sentinel flags the master as down.
    pub status_ok: bool,
    pub num_slaves: u32,
    pub num_other_sentinels: u32,
}

/// Everything one sentinel reported during a poll, keyed by group id.
///
/// Only masters whose name belongs to this cluster's product are included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelReport {
    #[serde(default)]
    pub masters: BTreeMap<u32, MonitoredMaster>,
    #[serde(default)]
    pub groups: BTreeMap<u32, SentinelGroupView>,
}

// ---------------------------------------------------------------------------
// RunIdMismatch
// ---------------------------------------------------------------------------

/// Direction of a run id divergence between a sentinel and the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// The sentinel tracks a run id no member of the group reports.
    Unexpected,
    /// A member's run id is not tracked by the sentinel.
    Missing,
}

/// One run id divergence for one group on one sentinel.
///
/// Renders as `[+]group=3,server=10.0.0.9:6379,runid=abc` for unexpected
/// entries and `[-]...` for missing ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunIdMismatch {
    pub group_id: u32,
    pub kind: MismatchKind,
    pub server: String,
    pub runid: String,
}

impl fmt::Display for RunIdMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.kind {
            MismatchKind::Unexpected => '+',
            MismatchKind::Missing => '-',
        };
        let runid = if self.runid.is_empty() { "NA" } else { &self.runid };
        write!(
            f,
            "[{sign}]group={},server={},runid={runid}",
            self.group_id, self.server
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_renders_sign_and_fields() {
        let m = RunIdMismatch {
            group_id: 3,
            kind: MismatchKind::Unexpected,
            server: "10.0.0.9:6379".to_string(),
            runid: "abc".to_string(),
        };
        assert_eq!(m.to_string(), "[+]group=3,server=10.0.0.9:6379,runid=abc");

        let m = RunIdMismatch {
            kind: MismatchKind::Missing,
            runid: String::new(),
            ..m
        };
        assert_eq!(m.to_string(), "[-]group=3,server=10.0.0.9:6379,runid=NA");
    }

    #[test]
    fn group_view_nodes_lists_master_first() {
        let view = SentinelGroupView {
            master: SentinelNode {
                addr: "a:1".to_string(),
                runid: "r1".to_string(),
            },
            slaves: vec![SentinelNode {
                addr: "b:1".to_string(),
                runid: "r2".to_string(),
            }],
        };
        let addrs: Vec<_> = view.nodes().map(|n| n.addr.as_str()).collect();
        assert_eq!(addrs, vec!["a:1", "b:1"]);
    }
}
