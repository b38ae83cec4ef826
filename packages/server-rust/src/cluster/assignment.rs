//! Slot rebalancing planner.
//!
//! Free functions over a snapshot, deterministic for a given input:
//! - `rebalance_quotas()`: target slot count per group (count equalization)
//! - `plan_rebalance()`: slot moves that bring the table to those quotas

use std::collections::{BTreeMap, BTreeSet};

use topom_core::{Group, Snapshot};

/// Groups that may receive slots: non-empty and not promoting, ascending id.
#[must_use]
pub fn eligible_groups(snapshot: &Snapshot) -> Vec<u32> {
    snapshot
        .groups
        .values()
        .filter(|g| !g.servers.is_empty() && !g.is_promoting())
        .map(|g| g.id)
        .collect()
}

/// Splits `slot_count` slots as evenly as possible over `groups`.
///
/// The first `slot_count % groups.len()` groups in ascending id order carry
/// one extra slot.
#[must_use]
pub fn rebalance_quotas(groups: &[u32], slot_count: u32) -> BTreeMap<u32, u32> {
    let mut sorted = groups.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let Ok(k) = u32::try_from(sorted.len()) else {
        return BTreeMap::new();
    };
    if k == 0 {
        return BTreeMap::new();
    }
    let base = slot_count / k;
    let extra = slot_count % k;
    sorted
        .into_iter()
        .zip(0u32..)
        .map(|(gid, i)| (gid, base + u32::from(i < extra)))
        .collect()
}

/// Computes `slot -> target group` moves that equalize slot counts.
///
/// - Slots that already carry an action are fixed and count toward their
///   target.
/// - Slots owned by no eligible group are always moved.
/// - A group above its quota gives up its highest-id free slots.
/// - Freed slots are handed out in ascending id order to groups below
///   quota, ascending group id first.
///
/// Returns an empty plan when no group is eligible. Planning the table that
/// results from committing a plan yields an empty plan.
#[must_use]
pub fn plan_rebalance(snapshot: &Snapshot) -> BTreeMap<u32, u32> {
    let groups = eligible_groups(snapshot);
    let quotas = rebalance_quotas(&groups, snapshot.slot_count());
    if quotas.is_empty() {
        return BTreeMap::new();
    }

    let mut counts: BTreeMap<u32, u32> = quotas.keys().map(|&gid| (gid, 0)).collect();
    let mut free: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    let mut orphans = BTreeSet::new();

    for m in &snapshot.slots {
        let owner = m.action.as_ref().map_or(m.group_id, |a| a.target_id);
        match counts.get_mut(&owner) {
            Some(n) => {
                *n += 1;
                if m.action.is_none() {
                    free.entry(owner).or_default().push(m.id);
                }
            }
            None if m.action.is_none() => {
                orphans.insert(m.id);
            }
            None => {}
        }
    }

    let mut released = BTreeSet::new();
    for (&gid, &quota) in &quotas {
        let surplus = counts[&gid].saturating_sub(quota);
        if surplus == 0 {
            continue;
        }
        let owned = free.get(&gid).map_or(&[][..], Vec::as_slice);
        for &sid in owned.iter().rev().take(surplus as usize) {
            released.insert(sid);
        }
        if let Some(n) = counts.get_mut(&gid) {
            *n -= surplus.min(u32::try_from(owned.len()).unwrap_or(u32::MAX));
        }
    }

    let mut pool: Vec<u32> = orphans.iter().chain(released.iter()).copied().collect();
    pool.sort_unstable();
    let mut pool = pool.into_iter().peekable();

    let mut plan = BTreeMap::new();
    for (&gid, &quota) in &quotas {
        while counts[&gid] < quota {
            let Some(sid) = pool.next() else { break };
            plan.insert(sid, gid);
            if let Some(n) = counts.get_mut(&gid) {
                *n += 1;
            }
        }
    }

    // Unused orphans still need an owner; unused released slots stay put.
    for sid in pool.filter(|sid| orphans.contains(sid)) {
        if let Some((&gid, n)) = counts.iter_mut().min_by_key(|(gid, n)| (**n, **gid)) {
            plan.insert(sid, gid);
            *n += 1;
        }
    }

    plan.retain(|sid, gid| snapshot.slot(*sid).is_some_and(|m| m.group_id != *gid));
    plan
}

/// Slot counts per group as a planned table would leave them.
#[must_use]
pub fn projected_counts(snapshot: &Snapshot, plan: &BTreeMap<u32, u32>) -> BTreeMap<u32, u32> {
    let mut counts = BTreeMap::new();
    for m in &snapshot.slots {
        let owner = plan
            .get(&m.id)
            .copied()
            .or_else(|| m.action.as_ref().map(|a| a.target_id))
            .unwrap_or(m.group_id);
        if snapshot.group(owner).is_some_and(|g: &Group| !g.servers.is_empty()) {
            *counts.entry(owner).or_insert(0) += 1;
        }
    }
    counts
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use topom_core::{GroupServer, Promoting, PromotingState, SlotAction, SlotActionState};

    use super::*;

    fn with_groups(slots: u32, gids: &[u32]) -> Snapshot {
        let mut s = Snapshot::new("demo", slots);
        for &gid in gids {
            let mut g = Group::new(gid);
            g.servers.push(GroupServer::new(format!("10.0.0.{gid}:6379"), ""));
            s.groups.insert(gid, g);
        }
        s
    }

    /// Commits a plan the way slot actions eventually would.
    fn apply(s: &mut Snapshot, plan: &BTreeMap<u32, u32>) {
        for (&sid, &gid) in plan {
            s.slots[sid as usize].group_id = gid;
        }
    }

    #[test]
    fn quotas_give_extras_to_lowest_ids() {
        let q = rebalance_quotas(&[3, 1, 2], 10);
        assert_eq!(q, BTreeMap::from([(1, 4), (2, 3), (3, 3)]));
        assert!(rebalance_quotas(&[], 10).is_empty());
    }

    #[test]
    fn unassigned_table_is_split_in_id_order() {
        let s = with_groups(8, &[1, 2]);
        let plan = plan_rebalance(&s);
        assert_eq!(plan.len(), 8);
        assert!((0..4).all(|sid| plan[&sid] == 1));
        assert!((4..8).all(|sid| plan[&sid] == 2));
    }

    #[test]
    fn new_group_takes_highest_slots_of_full_group() {
        let mut s = with_groups(6, &[1, 2]);
        for m in &mut s.slots {
            m.group_id = 1;
        }
        let plan = plan_rebalance(&s);
        assert_eq!(plan, BTreeMap::from([(3, 2), (4, 2), (5, 2)]));
    }

    #[test]
    fn pending_actions_count_toward_target() {
        let mut s = with_groups(4, &[1, 2]);
        for m in &mut s.slots {
            m.group_id = 1;
        }
        s.slots[0].action = Some(SlotAction {
            index: 1,
            state: SlotActionState::Pending,
            target_id: 2,
        });
        let plan = plan_rebalance(&s);
        assert_eq!(plan, BTreeMap::from([(3, 2)]));
    }

    #[test]
    fn promoting_and_empty_groups_are_skipped() {
        let mut s = with_groups(4, &[1, 2]);
        s.groups.insert(3, Group::new(3));
        s.groups.get_mut(&2).unwrap().promoting = Some(Promoting {
            index: 0,
            state: PromotingState::Pending,
        });
        assert_eq!(eligible_groups(&s), vec![1]);
        let plan = plan_rebalance(&s);
        assert!(plan.values().all(|&gid| gid == 1));
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn no_groups_means_no_plan() {
        assert!(plan_rebalance(&Snapshot::new("demo", 4)).is_empty());
    }

    #[test]
    fn balanced_table_is_stable() {
        let mut s = with_groups(6, &[1, 2, 3]);
        for m in &mut s.slots {
            m.group_id = m.id / 2 + 1;
        }
        assert!(plan_rebalance(&s).is_empty());
    }

    fn arb_table() -> impl Strategy<Value = Snapshot> {
        (1u32..64, 1usize..6).prop_flat_map(|(slots, groups)| {
            let gids: Vec<u32> = (1..=groups as u32).collect();
            let owners = proptest::collection::vec(0..=groups as u32, slots as usize);
            (Just(slots), Just(gids), owners)
        })
        .prop_map(|(slots, gids, owners)| {
            let mut s = with_groups(slots, &gids);
            for (m, owner) in s.slots.iter_mut().zip(owners) {
                m.group_id = owner;
            }
            s
        })
    }

    proptest! {
        #[test]
        fn plan_is_deterministic(s in arb_table()) {
            prop_assert_eq!(plan_rebalance(&s), plan_rebalance(&s));
        }

        #[test]
        fn applied_plan_is_balanced_and_idempotent(mut s in arb_table()) {
            let plan = plan_rebalance(&s);
            apply(&mut s, &plan);

            let counts = projected_counts(&s, &BTreeMap::new());
            let total: u32 = counts.values().sum();
            prop_assert_eq!(total, s.slot_count());
            let max = counts.values().max().copied().unwrap_or(0);
            let min = s.groups.keys().map(|g| counts.get(g).copied().unwrap_or(0)).min().unwrap_or(0);
            prop_assert!(max - min <= 1);

            prop_assert!(plan_rebalance(&s).is_empty());
        }
    }
}
