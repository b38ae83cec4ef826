//! Replica group model.
//!
//! A group is an ordered list of servers where index 0 is the logical master.
//! Two independent state machines hang off a group:
//!
//! - [`Promoting`]: master promotion, `pending -> prepared -> finished`
//! - [`ServerAction`]: per-server resync, `pending -> syncing` (or `sync_failed`)

use serde::{Deserialize, Serialize};

/// Largest valid group id. Id `0` is reserved for "unassigned".
pub const MAX_GROUP_ID: u32 = 9999;

// ---------------------------------------------------------------------------
// Promotion
// ---------------------------------------------------------------------------

/// Progress of a master promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotingState {
    /// Recorded; proxies not yet told to pause the group's slots.
    Pending,
    /// Proxies hold the group's slots locked; the candidate is being detached.
    Prepared,
    /// Servers reordered; waiting for proxies to receive the new master.
    Finished,
}

impl PromotingState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Prepared => "prepared",
            Self::Finished => "finished",
        }
    }
}

/// In-flight promotion of the server at `index` to master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promoting {
    pub index: usize,
    pub state: PromotingState,
}

// ---------------------------------------------------------------------------
// Sync actions
// ---------------------------------------------------------------------------

/// State of a per-server resync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerActionState {
    Pending,
    Syncing,
    SyncFailed,
}

impl ServerActionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::SyncFailed => "sync_failed",
        }
    }
}

/// Resync request attached to a single group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAction {
    pub index: u64,
    pub state: ServerActionState,
}

// ---------------------------------------------------------------------------
// GroupServer / Group
// ---------------------------------------------------------------------------

/// One storage server inside a group.
///
/// Observed properties (role, link status, memory) are never stored here;
/// they come from the stats cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupServer {
    /// `host:port`, unique across every group.
    pub server: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datacenter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ServerAction>,
    /// Whether this replica may serve reads for the group's slots.
    #[serde(default)]
    pub replica_group: bool,
}

impl GroupServer {
    #[must_use]
    pub fn new(server: impl Into<String>, datacenter: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            datacenter: datacenter.into(),
            action: None,
            replica_group: false,
        }
    }
}

/// A replica set owning zero or more slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: u32,
    #[serde(default)]
    pub servers: Vec<GroupServer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoting: Option<Promoting>,
    /// Replication layout changed since the last successful resync.
    #[serde(default)]
    pub out_of_sync: bool,
}

impl Group {
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self {
            id,
            servers: Vec::new(),
            promoting: None,
            out_of_sync: false,
        }
    }

    /// Address of the logical master (index 0), if the group is non-empty.
    #[must_use]
    pub fn master(&self) -> Option<&str> {
        self.servers.first().map(|s| s.server.as_str())
    }

    /// Position of `addr` within the group.
    #[must_use]
    pub fn index_of(&self, addr: &str) -> Option<usize> {
        self.servers.iter().position(|s| s.server == addr)
    }

    #[must_use]
    pub fn is_promoting(&self) -> bool {
        self.promoting.is_some()
    }

    /// Slots of a group are locked while its promotion sits in `prepared`.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(
            self.promoting,
            Some(Promoting {
                state: PromotingState::Prepared,
                ..
            })
        )
    }
}

// ---------------------------------------------------------------------------
// Address validation
// ---------------------------------------------------------------------------

/// Returns `true` if `addr` looks like `host:port` with a non-empty host and
/// a numeric port. Bracketed IPv6 hosts (`[::1]:6379`) are accepted.
#[must_use]
pub fn is_valid_server_addr(addr: &str) -> bool {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return false;
    };
    if host.is_empty() || port.parse::<u16>().is_err() {
        return false;
    }
    if let Some(inner) = host.strip_prefix('[') {
        return inner.strip_suffix(']').is_some_and(|h| !h.is_empty());
    }
    !host.contains(':')
}
