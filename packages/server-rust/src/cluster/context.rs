//! Routing view of a snapshot: what each proxy must be told about a slot.

use topom_core::{Group, Proxy, Slot, SlotActionState, SlotMapping, Snapshot};

/// Whether a proxy must hold requests for the slot.
///
/// A slot is locked while a group it reads from or writes to sits in the
/// `prepared` promotion step.
#[must_use]
pub fn is_slot_locked(snapshot: &Snapshot, m: &SlotMapping) -> bool {
    let locked = |gid: u32| snapshot.group(gid).is_some_and(Group::is_locked);
    match &m.action {
        Some(a) if a.state.is_in_flight() => locked(m.group_id) || locked(a.target_id),
        _ => locked(m.group_id),
    }
}

/// Builds the routing entry for one slot as seen by `proxy`.
///
/// `proxy` only influences the ordering of replica groups; pass `None` when
/// the reader is not a proxy.
#[must_use]
pub fn to_slot(snapshot: &Snapshot, m: &SlotMapping, proxy: Option<&Proxy>) -> Slot {
    let master = |gid: u32| snapshot.group_master(gid).unwrap_or_default().to_string();
    let mut slot = Slot {
        id: m.id,
        locked: is_slot_locked(snapshot, m),
        ..Slot::default()
    };
    match m.action.as_ref().map(|a| (a.state, a.target_id)) {
        None | Some((SlotActionState::Pending, _)) => {
            slot.backend_addr = master(m.group_id);
            slot.backend_addr_group_id = m.group_id;
            slot.replica_groups = replica_groups(snapshot.group(m.group_id), proxy);
        }
        Some((SlotActionState::Migrating, target)) => {
            slot.backend_addr = master(target);
            slot.backend_addr_group_id = target;
            slot.migrate_from = master(m.group_id);
            slot.migrate_from_group_id = m.group_id;
        }
        Some((SlotActionState::Finished, target)) => {
            slot.backend_addr = master(target);
            slot.backend_addr_group_id = target;
        }
    }
    slot
}

/// Routing entries for the given slot ids, skipping unknown ids.
#[must_use]
pub fn to_slots(snapshot: &Snapshot, sids: &[u32], proxy: Option<&Proxy>) -> Vec<Slot> {
    sids.iter()
        .filter_map(|&sid| snapshot.slot(sid))
        .map(|m| to_slot(snapshot, m, proxy))
        .collect()
}

/// Routing entries for every slot.
#[must_use]
pub fn all_slots(snapshot: &Snapshot, proxy: Option<&Proxy>) -> Vec<Slot> {
    snapshot
        .slots
        .iter()
        .map(|m| to_slot(snapshot, m, proxy))
        .collect()
}

/// Ids of the slots owned by or moving to `gid`.
#[must_use]
pub fn slot_ids_of_group(snapshot: &Snapshot, gid: u32) -> Vec<u32> {
    snapshot.slots_using_group(gid).map(|m| m.id).collect()
}

/// Read replicas of a group, bucketed by proximity to `proxy`.
///
/// Buckets in order: same host, same datacenter, elsewhere. Empty buckets are
/// dropped. Groups that are promoting or have no replica yield nothing.
fn replica_groups(group: Option<&Group>, proxy: Option<&Proxy>) -> Vec<Vec<String>> {
    let Some(group) = group else {
        return Vec::new();
    };
    if group.is_promoting() || group.servers.len() <= 1 {
        return Vec::new();
    }

    let origin = proxy.map(|p| (p.datacenter.as_str(), host_of(&p.admin_addr)));
    let mut buckets: [Vec<String>; 3] = Default::default();
    for s in group.servers.iter().filter(|s| s.replica_group) {
        let priority = match origin {
            Some((dc, host)) if dc == s.datacenter => usize::from(host != host_of(&s.server)),
            _ => 2,
        };
        buckets[priority].push(s.server.clone());
    }
    buckets.into_iter().filter(|b| !b.is_empty()).collect()
}

/// Host part of `host:port`, brackets stripped.
fn host_of(addr: &str) -> &str {
    let host = addr.rsplit_once(':').map_or(addr, |(h, _)| h);
    host.trim_start_matches('[').trim_end_matches(']')
}
