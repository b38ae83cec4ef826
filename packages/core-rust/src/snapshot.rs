//! Topology snapshot: the unit of persistence and of consistent reads.
//!
//! A [`Snapshot`] is never mutated in place once published. Writers clone it,
//! apply a change, bump `version` and publish the clone as a whole.
//!
//! The persisted form is a `MsgPack` envelope (`rmp_serde::to_vec_named`)
//! carrying a format number so older documents can be rejected explicitly.

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, ensure, Context};
use serde::{Deserialize, Serialize};

use crate::group::{Group, MAX_GROUP_ID};
use crate::proxy::Proxy;
use crate::sentinel::SentinelModel;
use crate::slot::{SlotActionState, SlotMapping, MAX_SLOT_COUNT};

/// Current persisted snapshot format.
pub const SNAPSHOT_FORMAT: u32 = 1;

/// Default pause between two migration steps, in milliseconds.
pub const DEFAULT_ACTION_INTERVAL_MS: u64 = 10_000;

/// Largest accepted migration step interval, in milliseconds.
pub const MAX_ACTION_INTERVAL_MS: u64 = 1_000_000;

// ---------------------------------------------------------------------------
// SlotActionConfig
// ---------------------------------------------------------------------------

/// Scheduling knobs of the slot migration driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotActionConfig {
    /// Minimum pause between two migration steps.
    pub interval_ms: u64,
    /// When set, the driver leaves pending actions untouched.
    pub disabled: bool,
}

impl Default for SlotActionConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_ACTION_INTERVAL_MS,
            disabled: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Complete, versioned topology of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Incremented by exactly one per committed mutation.
    pub version: u64,
    pub product_name: String,
    /// Indexed by slot id; length is fixed at initialization.
    pub slots: Vec<SlotMapping>,
    pub groups: BTreeMap<u32, Group>,
    /// Keyed by proxy token.
    pub proxies: BTreeMap<String, Proxy>,
    pub sentinel: SentinelModel,
    pub slot_action: SlotActionConfig,
}

impl Snapshot {
    /// Creates version 0 of a cluster with `slot_count` unassigned slots.
    #[must_use]
    pub fn new(product_name: impl Into<String>, slot_count: u32) -> Self {
        Self {
            version: 0,
            product_name: product_name.into(),
            slots: (0..slot_count).map(SlotMapping::new).collect(),
            groups: BTreeMap::new(),
            proxies: BTreeMap::new(),
            sentinel: SentinelModel::default(),
            slot_action: SlotActionConfig::default(),
        }
    }

    #[must_use]
    pub fn slot_count(&self) -> u32 {
        u32::try_from(self.slots.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn slot(&self, sid: u32) -> Option<&SlotMapping> {
        self.slots.get(sid as usize)
    }

    pub fn slot_mut(&mut self, sid: u32) -> Option<&mut SlotMapping> {
        self.slots.get_mut(sid as usize)
    }

    #[must_use]
    pub fn group(&self, gid: u32) -> Option<&Group> {
        self.groups.get(&gid)
    }

    pub fn group_mut(&mut self, gid: u32) -> Option<&mut Group> {
        self.groups.get_mut(&gid)
    }

    /// Finds the group containing `addr` and the server's index within it.
    #[must_use]
    pub fn group_by_server(&self, addr: &str) -> Option<(&Group, usize)> {
        self.groups
            .values()
            .find_map(|g| g.index_of(addr).map(|i| (g, i)))
    }

    /// Mutable variant of [`Snapshot::group_by_server`].
    pub fn group_by_server_mut(&mut self, addr: &str) -> Option<(&mut Group, usize)> {
        self.groups
            .values_mut()
            .find_map(|g| g.index_of(addr).map(move |i| (g, i)))
    }

    /// Master address of `gid`, or `None` for unknown or empty groups.
    #[must_use]
    pub fn group_master(&self, gid: u32) -> Option<&str> {
        self.group(gid).and_then(Group::master)
    }

    /// Expected master of every non-empty group.
    #[must_use]
    pub fn group_masters(&self) -> BTreeMap<u32, String> {
        self.groups
            .values()
            .filter_map(|g| g.master().map(|m| (g.id, m.to_string())))
            .collect()
    }

    /// Whether any slot is owned by or moving to `gid`.
    #[must_use]
    pub fn is_group_in_use(&self, gid: u32) -> bool {
        self.slots.iter().any(|m| m.uses_group(gid))
    }

    /// Slots owned by or moving to `gid`, ascending by id.
    pub fn slots_using_group(&self, gid: u32) -> impl Iterator<Item = &SlotMapping> {
        self.slots.iter().filter(move |m| m.uses_group(gid))
    }

    /// Largest action index among slots that carry an action.
    #[must_use]
    pub fn max_slot_action_index(&self) -> u64 {
        self.slots
            .iter()
            .filter_map(|m| m.action.as_ref().map(|a| a.index))
            .max()
            .unwrap_or(0)
    }

    /// Largest sync action index across every group member.
    #[must_use]
    pub fn max_sync_action_index(&self) -> u64 {
        self.groups
            .values()
            .flat_map(|g| g.servers.iter())
            .filter_map(|s| s.action.map(|a| a.index))
            .max()
            .unwrap_or(0)
    }

    /// The slot currently owned by the migration driver, if any.
    #[must_use]
    pub fn in_flight_slot(&self) -> Option<&SlotMapping> {
        self.slots
            .iter()
            .find(|m| m.action_state().is_some_and(SlotActionState::is_in_flight))
    }

    #[must_use]
    pub fn max_proxy_id(&self) -> u32 {
        self.proxies.values().map(|p| p.id).max().unwrap_or(0)
    }

    /// Checks the structural invariants every committed snapshot must hold.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.slots.is_empty(), "slot table is empty");
        ensure!(
            self.slots.len() <= MAX_SLOT_COUNT as usize,
            "slot table exceeds {MAX_SLOT_COUNT} slots"
        );

        let mut in_flight = 0usize;
        for (i, m) in self.slots.iter().enumerate() {
            ensure!(m.id as usize == i, "slot at position {i} has id {}", m.id);
            if m.group_id != 0 {
                ensure!(
                    self.groups.contains_key(&m.group_id),
                    "slot-[{}] owned by missing group-[{}]",
                    m.id,
                    m.group_id
                );
            }
            if let Some(action) = &m.action {
                ensure!(
                    action.target_id != m.group_id,
                    "slot-[{}] targets its own group-[{}]",
                    m.id,
                    m.group_id
                );
                ensure!(
                    self.groups.contains_key(&action.target_id),
                    "slot-[{}] targets missing group-[{}]",
                    m.id,
                    action.target_id
                );
                if action.state.is_in_flight() {
                    in_flight += 1;
                }
            }
        }
        ensure!(in_flight <= 1, "{in_flight} slots are migrating at once");

        let mut seen = HashSet::new();
        for (gid, g) in &self.groups {
            ensure!(*gid == g.id, "group keyed {gid} has id {}", g.id);
            ensure!(
                (1..=MAX_GROUP_ID).contains(gid),
                "group id {gid} out of range"
            );
            if let Some(p) = g.promoting {
                ensure!(
                    p.index < g.servers.len(),
                    "group-[{gid}] promoting index {} out of range",
                    p.index
                );
            }
            for s in &g.servers {
                if !seen.insert(s.server.as_str()) {
                    bail!("server-[{}] appears in more than one place", s.server);
                }
            }
        }

        for (token, p) in &self.proxies {
            ensure!(*token == p.token, "proxy keyed {token} has token {}", p.token);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Persisted envelope
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    format: u32,
    snapshot: T,
}

/// Serializes a snapshot into its persisted form.
///
/// # Errors
///
/// Returns an error if `MsgPack` encoding fails.
pub fn encode_snapshot(snapshot: &Snapshot) -> anyhow::Result<Vec<u8>> {
    let envelope = Envelope {
        format: SNAPSHOT_FORMAT,
        snapshot,
    };
    rmp_serde::to_vec_named(&envelope).context("encode snapshot")
}

/// Restores a snapshot from its persisted form.
///
/// # Errors
///
/// Returns an error if the bytes are not a valid envelope, carry an
/// unsupported format, or describe an invalid topology.
pub fn decode_snapshot(bytes: &[u8]) -> anyhow::Result<Snapshot> {
    let envelope: Envelope<Snapshot> = rmp_serde::from_slice(bytes).context("decode snapshot")?;
    ensure!(
        envelope.format == SNAPSHOT_FORMAT,
        "unsupported snapshot format {} (expected {SNAPSHOT_FORMAT})",
        envelope.format
    );
    envelope.snapshot.validate()?;
    Ok(envelope.snapshot)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::group::{GroupServer, Promoting, PromotingState, ServerAction, ServerActionState};
    use crate::slot::SlotAction;

    fn two_group_snapshot() -> Snapshot {
        let mut s = Snapshot::new("demo", 8);
        let mut g1 = Group::new(1);
        g1.servers.push(GroupServer::new("10.0.0.1:6379", "dc1"));
        g1.servers.push(GroupServer::new("10.0.0.2:6379", "dc1"));
        let mut g2 = Group::new(2);
        g2.servers.push(GroupServer::new("10.0.0.3:6379", ""));
        s.groups.insert(1, g1);
        s.groups.insert(2, g2);
        for m in &mut s.slots {
            m.group_id = 1;
        }
        s
    }

    #[test]
    fn new_snapshot_has_unassigned_slots() {
        let s = Snapshot::new("demo", 4);
        assert_eq!(s.version, 0);
        assert_eq!(s.slot_count(), 4);
        assert!(s.slots.iter().all(|m| m.group_id == 0 && m.action.is_none()));
        assert_eq!(s.slot_action, SlotActionConfig::default());
        s.validate().unwrap();
    }

    #[test]
    fn lookups_by_server_and_usage() {
        let mut s = two_group_snapshot();
        let (g, idx) = s.group_by_server("10.0.0.2:6379").unwrap();
        assert_eq!((g.id, idx), (1, 1));
        assert!(s.group_by_server("10.0.0.9:6379").is_none());

        assert!(s.is_group_in_use(1));
        assert!(!s.is_group_in_use(2));
        s.slots[3].action = Some(SlotAction {
            index: 4,
            state: SlotActionState::Pending,
            target_id: 2,
        });
        assert!(s.is_group_in_use(2));
        assert_eq!(s.max_slot_action_index(), 4);
        assert_eq!(s.slots_using_group(2).count(), 1);

        let masters = s.group_masters();
        assert_eq!(masters.get(&1).map(String::as_str), Some("10.0.0.1:6379"));
        assert_eq!(masters.get(&2).map(String::as_str), Some("10.0.0.3:6379"));
    }

    #[test]
    fn validate_rejects_two_in_flight_slots() {
        let mut s = two_group_snapshot();
        for sid in [0, 1] {
            s.slots[sid].action = Some(SlotAction {
                index: sid as u64 + 1,
                state: SlotActionState::Migrating,
                target_id: 2,
            });
        }
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("2 slots are migrating"));
    }

    #[test]
    fn validate_rejects_self_target_and_missing_group() {
        let mut s = two_group_snapshot();
        s.slots[0].action = Some(SlotAction {
            index: 1,
            state: SlotActionState::Pending,
            target_id: 1,
        });
        assert!(s.validate().is_err());

        let mut s = two_group_snapshot();
        s.slots[0].group_id = 7;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_server() {
        let mut s = two_group_snapshot();
        s.groups
            .get_mut(&2)
            .unwrap()
            .servers
            .push(GroupServer::new("10.0.0.1:6379", ""));
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("10.0.0.1:6379"));
    }

    #[test]
    fn decode_rejects_unknown_format() {
        let envelope = Envelope {
            format: 99,
            snapshot: two_group_snapshot(),
        };
        let bytes = rmp_serde::to_vec_named(&envelope).unwrap();
        let err = decode_snapshot(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported snapshot format 99"));
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let mut s = two_group_snapshot();
        s.version = 42;
        s.slot_action = SlotActionConfig {
            interval_ms: 250,
            disabled: true,
        };
        s.slots[5].action = Some(SlotAction {
            index: 9,
            state: SlotActionState::Migrating,
            target_id: 2,
        });
        let g1 = s.groups.get_mut(&1).unwrap();
        g1.promoting = Some(Promoting {
            index: 1,
            state: PromotingState::Prepared,
        });
        g1.servers[1].action = Some(ServerAction {
            index: 3,
            state: ServerActionState::SyncFailed,
        });
        g1.servers[1].replica_group = true;
        s.proxies.insert(
            "t-1".to_string(),
            Proxy {
                id: 1,
                token: "t-1".to_string(),
                admin_addr: "10.0.1.1:11080".to_string(),
                proxy_addr: "10.0.1.1:19000".to_string(),
                datacenter: "dc1".to_string(),
                start_time: "2026-01-01 00:00:00".to_string(),
            },
        );
        s.sentinel.servers = vec!["10.0.2.1:26379".to_string()];
        s.sentinel.out_of_sync = true;

        let bytes = encode_snapshot(&s).unwrap();
        let restored = decode_snapshot(&bytes).unwrap();
        assert_eq!(restored, s);
        assert_eq!(encode_snapshot(&restored).unwrap(), bytes);
    }

    proptest! {
        #[test]
        fn round_trip_arbitrary_assignment(
            owners in proptest::collection::vec(0u32..=3, 1..64),
            interval in 0u64..=MAX_ACTION_INTERVAL_MS,
            disabled in any::<bool>(),
            version in any::<u64>(),
        ) {
            let mut s = Snapshot::new("prop", u32::try_from(owners.len()).unwrap());
            for gid in 1..=3u32 {
                let mut g = Group::new(gid);
                g.servers.push(GroupServer::new(format!("10.0.0.{gid}:6379"), ""));
                s.groups.insert(gid, g);
            }
            for (m, owner) in s.slots.iter_mut().zip(&owners) {
                m.group_id = *owner;
            }
            s.version = version;
            s.slot_action = SlotActionConfig { interval_ms: interval, disabled };

            let restored = decode_snapshot(&encode_snapshot(&s).unwrap()).unwrap();
            prop_assert_eq!(restored, s);
        }
    }
}
