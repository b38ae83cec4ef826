//! Slot table model.
//!
//! The keyspace is split into a fixed number of slots. Each slot is owned by
//! exactly one replica group (or by none, `group_id == 0`) and may carry a
//! single in-flight migration descriptor:
//!
//! - [`SlotMapping`]: persisted ownership plus optional [`SlotAction`]
//! - [`SlotActionState`]: `pending -> migrating -> finished`, then cleared
//! - [`Slot`]: routing view pushed to proxies, derived from a mapping

use serde::{Deserialize, Serialize};

/// Default number of slots in a freshly initialized cluster.
pub const DEFAULT_SLOT_COUNT: u32 = 1024;

/// Upper bound on the configurable slot count.
pub const MAX_SLOT_COUNT: u32 = 16_384;

// ---------------------------------------------------------------------------
// SlotActionState
// ---------------------------------------------------------------------------

/// Lifecycle state of a slot migration.
///
/// A slot without an action is implicitly in the "none" state; there is no
/// explicit variant for it so that `Option<SlotAction>` carries that meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotActionState {
    /// Queued, not yet picked up by the migration driver. Removable.
    Pending,
    /// Proxies route to the target group; keys are being moved.
    Migrating,
    /// All keys moved; waiting for the final routing push before clearing.
    Finished,
}

impl SlotActionState {
    /// Returns the wire name of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Migrating => "migrating",
            Self::Finished => "finished",
        }
    }

    /// Whether the migration driver owns this slot (it can no longer be removed).
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Migrating | Self::Finished)
    }
}

impl std::fmt::Display for SlotActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SlotAction / SlotMapping
// ---------------------------------------------------------------------------

/// In-flight migration of one slot to another group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAction {
    /// Monotonic sequence number, `max(existing) + 1` at creation.
    pub index: u64,
    pub state: SlotActionState,
    /// Group the slot is moving to. Never equal to the owning group.
    pub target_id: u32,
}

/// Persisted ownership record for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMapping {
    pub id: u32,
    /// Owning group, `0` when the slot is unassigned.
    pub group_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<SlotAction>,
}

impl SlotMapping {
    /// Creates an unassigned slot with no action.
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self {
            id,
            group_id: 0,
            action: None,
        }
    }

    /// Returns the action state, if an action is present.
    #[must_use]
    pub fn action_state(&self) -> Option<SlotActionState> {
        self.action.as_ref().map(|a| a.state)
    }

    /// Returns `true` if the slot is owned by `gid` or is moving to it.
    #[must_use]
    pub fn uses_group(&self, gid: u32) -> bool {
        self.group_id == gid || self.action.as_ref().is_some_and(|a| a.target_id == gid)
    }
}

// ---------------------------------------------------------------------------
// Slot (proxy routing view)
// ---------------------------------------------------------------------------

/// Routing entry for a single slot as consumed by proxies.
///
/// While a slot migrates, `backend_addr` already points at the target group's
/// master and `migrate_from` names the source master so the proxy can pull
/// keys on demand. `locked` pauses forwarding while a group master changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: u32,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend_addr: String,
    #[serde(default)]
    pub backend_addr_group_id: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub migrate_from: String,
    #[serde(default)]
    pub migrate_from_group_id: u32,
    /// Read replicas grouped by locality, nearest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replica_groups: Vec<Vec<String>>,
}
