//! Slot action engine: action creation and removal, driver settings,
//! rebalancing, and the single-flight migration driver step.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use topom_core::{
    SlotAction, SlotActionState, SlotMapping, Snapshot, MAX_ACTION_INTERVAL_MS,
};
use tracing::{debug, info};

use super::assignment;
use super::error::{group_entity, server_entity, slot_entity, TopomError, TopomResult};
use super::topom::Topom;

/// Outcome of a rebalance request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RebalancePlan {
    /// Snapshot version the plan was computed on, or committed as.
    pub version: u64,
    /// `slot -> target group`.
    pub plan: BTreeMap<u32, u32>,
}

/// Checks that `gid` can receive slots.
fn check_target(s: &Snapshot, gid: u32) -> TopomResult<()> {
    let g = s
        .group(gid)
        .ok_or_else(|| TopomError::validation(group_entity(gid), "doesn't exist"))?;
    if g.servers.is_empty() {
        return Err(TopomError::validation(group_entity(gid), "is empty"));
    }
    Ok(())
}

/// Puts a pending action on one slot, numbered after every existing action.
fn add_action(s: &mut Snapshot, sid: u32, target: u32) -> TopomResult<()> {
    let index = s.max_slot_action_index() + 1;
    let m = s
        .slot_mut(sid)
        .ok_or_else(|| TopomError::validation(slot_entity(sid), "out of range"))?;
    if m.action.is_some() {
        return Err(TopomError::validation(slot_entity(sid), "already has an action"));
    }
    if m.group_id == target {
        return Err(TopomError::validation(
            slot_entity(sid),
            format!("already belongs to {}", group_entity(target)),
        ));
    }
    m.action = Some(SlotAction {
        index,
        state: SlotActionState::Pending,
        target_id: target,
    });
    Ok(())
}

impl Topom {
    // -- actions ------------------------------------------------------------

    /// Schedules a migration of slot `sid` to group `target`.
    ///
    /// # Errors
    ///
    /// Validation error if the slot is unknown or busy, the target group is
    /// missing or empty, or already owns the slot.
    pub async fn create_slot_action(
        &self,
        expected: Option<u64>,
        sid: u32,
        target: u32,
    ) -> TopomResult<Arc<Snapshot>> {
        let (next, ()) = self
            .store
            .commit(expected, |s| {
                check_target(s, target)?;
                add_action(s, sid, target)
            })
            .await?;
        info!(slot = sid, target, "slot action created");
        Ok(next)
    }

    /// Schedules the `n` lowest-id idle slots of group `from` to move to `to`.
    ///
    /// # Errors
    ///
    /// Validation error, with nothing scheduled, if fewer than `n` slots are
    /// eligible or either group is unusable.
    pub async fn create_slot_action_some(
        &self,
        expected: Option<u64>,
        n: u32,
        from: u32,
        to: u32,
    ) -> TopomResult<Arc<Snapshot>> {
        let (next, picked) = self
            .store
            .commit(expected, |s| {
                if s.group(from).is_none() {
                    return Err(TopomError::validation(group_entity(from), "doesn't exist"));
                }
                if from == to {
                    return Err(TopomError::validation(group_entity(to), "is the source group"));
                }
                check_target(s, to)?;
                let picked: Vec<u32> = s
                    .slots
                    .iter()
                    .filter(|m| m.group_id == from && m.action.is_none())
                    .map(|m| m.id)
                    .take(n as usize)
                    .collect();
                if picked.len() < n as usize {
                    return Err(TopomError::validation(
                        group_entity(from),
                        format!("has only {} idle slots, {n} requested", picked.len()),
                    ));
                }
                for &sid in &picked {
                    add_action(s, sid, to)?;
                }
                Ok(picked)
            })
            .await?;
        info!(from, to, slots = ?picked, "slot actions created");
        Ok(next)
    }

    /// Schedules every slot in `[beg, end]` not already owned by `target`.
    ///
    /// # Errors
    ///
    /// Validation error, with nothing scheduled, for a bad range, an unusable
    /// target, or any slot in range that already has an action.
    pub async fn create_slot_action_range(
        &self,
        expected: Option<u64>,
        beg: u32,
        end: u32,
        target: u32,
    ) -> TopomResult<Arc<Snapshot>> {
        let (next, count) = self
            .store
            .commit(expected, |s| {
                if beg > end || end >= s.slot_count() {
                    return Err(TopomError::validation(
                        "slots",
                        format!("invalid range [{beg},{end}]"),
                    ));
                }
                check_target(s, target)?;
                let mut count = 0usize;
                for sid in beg..=end {
                    if s.slot(sid).is_some_and(|m| m.group_id != target) {
                        add_action(s, sid, target)?;
                        count += 1;
                    }
                }
                Ok(count)
            })
            .await?;
        info!(beg, end, target, count, "slot actions created");
        Ok(next)
    }

    /// Cancels a migration that has not started.
    ///
    /// # Errors
    ///
    /// Validation error if the slot has no action or it is already running.
    pub async fn remove_slot_action(&self, expected: Option<u64>, sid: u32) -> TopomResult<Arc<Snapshot>> {
        let (next, ()) = self
            .store
            .commit(expected, |s| {
                let m = s
                    .slot_mut(sid)
                    .ok_or_else(|| TopomError::validation(slot_entity(sid), "out of range"))?;
                match m.action_state() {
                    None => Err(TopomError::validation(slot_entity(sid), "has no action")),
                    Some(SlotActionState::Pending) => {
                        m.action = None;
                        Ok(())
                    }
                    Some(state) => Err(TopomError::validation(
                        slot_entity(sid),
                        format!("action is {state}"),
                    )),
                }
            })
            .await?;
        info!(slot = sid, "slot action removed");
        Ok(next)
    }

    // -- driver settings ----------------------------------------------------

    /// Pauses or resumes the migration driver. Pending actions stay queued.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn set_slot_action_disabled(&self, expected: Option<u64>, disabled: bool) -> TopomResult<Arc<Snapshot>> {
        let (next, ()) = self
            .store
            .commit(expected, |s| {
                s.slot_action.disabled = disabled;
                Ok(())
            })
            .await?;
        info!(disabled, "slot action driver toggled");
        Ok(next)
    }

    /// Sets the pause between migration steps.
    ///
    /// # Errors
    ///
    /// Validation error above [`MAX_ACTION_INTERVAL_MS`].
    pub async fn set_slot_action_interval(&self, expected: Option<u64>, interval_ms: u64) -> TopomResult<Arc<Snapshot>> {
        if interval_ms > MAX_ACTION_INTERVAL_MS {
            return Err(TopomError::validation(
                "slot-action",
                format!("interval {interval_ms}ms exceeds {MAX_ACTION_INTERVAL_MS}ms"),
            ));
        }
        let (next, ()) = self
            .store
            .commit(expected, |s| {
                s.slot_action.interval_ms = interval_ms;
                Ok(())
            })
            .await?;
        info!(interval_ms, "slot action interval changed");
        Ok(next)
    }

    // -- rebalance ----------------------------------------------------------

    /// Plans a count-equalizing rebalance; with `confirm` the plan is turned
    /// into slot actions in one commit.
    ///
    /// A preview reads the last committed snapshot and changes nothing; a
    /// confirmed plan is recomputed under the mutation lock. A confirmed plan
    /// that moves nothing returns the current version without committing.
    ///
    /// # Errors
    ///
    /// Validation error if no group can receive slots.
    pub async fn rebalance(&self, expected: Option<u64>, confirm: bool) -> TopomResult<RebalancePlan> {
        let snapshot = self.store.read();
        if let Some(expected) = expected.filter(|v| *v != snapshot.version) {
            return Err(TopomError::Conflict {
                expected,
                current: snapshot.version,
            });
        }
        check_rebalance(&snapshot)?;
        let plan = assignment::plan_rebalance(&snapshot);
        if !confirm || plan.is_empty() {
            return Ok(RebalancePlan {
                version: snapshot.version,
                plan,
            });
        }

        let (next, plan) = self
            .store
            .commit(expected, |s| {
                check_rebalance(s)?;
                let plan = assignment::plan_rebalance(s);
                for (&sid, &gid) in &plan {
                    add_action(s, sid, gid)?;
                }
                Ok(plan)
            })
            .await?;
        info!(moves = plan.len(), version = next.version, "rebalance committed");
        Ok(RebalancePlan {
            version: next.version,
            plan,
        })
    }

    // -- driver -------------------------------------------------------------

    /// Chooses the slot the driver works on next and moves it to `migrating`.
    ///
    /// A slot already `migrating` or `finished` is resumed first. Otherwise
    /// the pending slot with the lowest action index whose groups are not
    /// promoting is started, and proxies learn its new routing. Returns
    /// `None` while disabled or idle.
    ///
    /// # Errors
    ///
    /// Store errors, or the external error of the routing push (the slot then
    /// stays `migrating` and is resumed next time).
    pub async fn prepare_slot_action(&self) -> TopomResult<Option<u32>> {
        let mut txn = self.store.begin(None).await?;
        let snapshot = txn.snapshot();
        if snapshot.slot_action.disabled {
            return Ok(None);
        }
        if let Some(m) = snapshot.in_flight_slot() {
            return Ok(Some(m.id));
        }
        let promoting = |gid: u32| snapshot.group(gid).is_some_and(|g| g.is_promoting());
        let next = snapshot
            .slots
            .iter()
            .filter_map(|m| {
                let a = m.action.as_ref()?;
                let ready = a.state == SlotActionState::Pending
                    && !promoting(m.group_id)
                    && !promoting(a.target_id);
                ready.then_some((a.index, m.id))
            })
            .min();
        let Some((_, sid)) = next else {
            return Ok(None);
        };

        let (next, ()) = txn
            .commit(|s| {
                if let Some(a) = s.slot_mut(sid).and_then(|m| m.action.as_mut()) {
                    a.state = SlotActionState::Migrating;
                }
                Ok(())
            })
            .await?;
        info!(slot = sid, "slot migration started");
        self.push_slots(&next, &[sid]).await?;
        Ok(Some(sid))
    }

    /// Drives one slot from `migrating` through `finished` to idle.
    ///
    /// Moves keys batch by batch, pausing `interval` between batches, then
    /// records completion and hands the slot to its target group.
    ///
    /// # Errors
    ///
    /// The first failing external call or commit; the slot keeps its state so
    /// the next attempt resumes where this one stopped.
    pub async fn migrate_slot(&self, sid: u32) -> TopomResult<()> {
        self.progress.set_executor(Some(sid));
        loop {
            let snapshot = self.store.read();
            let Some(m) = snapshot.slot(sid) else {
                break;
            };
            match m.action.as_ref().map(|a| a.state) {
                None | Some(SlotActionState::Pending) => break,
                Some(SlotActionState::Migrating) => {
                    let remain = self.migrate_batch(&snapshot, m).await?;
                    self.progress.record_step(remain);
                    if remain > 0 {
                        pause(snapshot.slot_action.interval_ms).await;
                        continue;
                    }
                    let (next, ()) = self
                        .store
                        .commit(None, |s| {
                            if let Some(a) = s.slot_mut(sid).and_then(|m| m.action.as_mut()) {
                                a.state = SlotActionState::Finished;
                            }
                            Ok(())
                        })
                        .await?;
                    self.push_slots(&next, &[sid]).await?;
                }
                Some(SlotActionState::Finished) => {
                    let (next, target) = self
                        .store
                        .commit(None, |s| {
                            let m = s
                                .slot_mut(sid)
                                .ok_or_else(|| TopomError::validation(slot_entity(sid), "out of range"))?;
                            let target = m.action.take().map_or(m.group_id, |a| a.target_id);
                            m.group_id = target;
                            Ok(target)
                        })
                        .await?;
                    self.push_slots(&next, &[sid]).await?;
                    metrics::counter!("topom_slot_migrations_total").increment(1);
                    info!(slot = sid, group = target, "slot migration finished");
                    break;
                }
            }
        }
        self.progress.set_executor(None);
        Ok(())
    }

    async fn migrate_batch(&self, snapshot: &Snapshot, m: &SlotMapping) -> TopomResult<u64> {
        let Some(action) = m.action.as_ref() else {
            return Ok(0);
        };
        let Some(from) = snapshot.group_master(m.group_id) else {
            // Nothing to move out of an unassigned slot.
            return Ok(0);
        };
        let to = snapshot.group_master(action.target_id).ok_or_else(|| {
            TopomError::validation(group_entity(action.target_id), "has no master")
        })?;
        let remain = self
            .call(
                server_entity(from),
                self.clients.server.migrate_slot(from, to, m.id),
            )
            .await?;
        debug!(slot = m.id, from, to, remain, "migration batch");
        Ok(remain)
    }

    /// Runs slot actions until none is left, the driver is disabled, or a
    /// step fails. Returns how many slots were completed.
    ///
    /// # Errors
    ///
    /// The first failing step; see [`migrate_slot`](Self::migrate_slot).
    pub async fn process_slot_actions(&self) -> TopomResult<usize> {
        let mut done = 0;
        while let Some(sid) = self.prepare_slot_action().await? {
            self.migrate_slot(sid).await?;
            done += 1;
            pause(self.store.read().slot_action.interval_ms).await;
        }
        Ok(done)
    }
}

fn check_rebalance(s: &Snapshot) -> TopomResult<()> {
    if assignment::eligible_groups(s).is_empty() {
        return Err(TopomError::validation("slots", "no group can receive slots"));
    }
    Ok(())
}

async fn pause(interval_ms: u64) {
    if interval_ms > 0 {
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assign_slots, test_topom};

    async fn two_groups(topom: &Topom) {
        topom.create_group(None, 1).await.unwrap();
        topom.add_server(None, 1, "10.0.0.1:6379", "").await.unwrap();
        topom.create_group(None, 2).await.unwrap();
        topom.add_server(None, 2, "10.0.0.2:6379", "").await.unwrap();
    }

    fn state_of(s: &Snapshot, sid: u32) -> Option<SlotActionState> {
        s.slot(sid).and_then(SlotMapping::action_state)
    }

    #[tokio::test]
    async fn create_single_validates_preconditions() {
        let (topom, _fakes) = test_topom(4).await;
        two_groups(&topom).await;
        topom.create_group(None, 3).await.unwrap();
        assign_slots(&topom, 1, &[0, 1, 2, 3]).await;

        assert!(topom.create_slot_action(None, 0, 9).await.is_err());
        assert!(topom.create_slot_action(None, 0, 3).await.is_err());
        assert!(topom.create_slot_action(None, 0, 1).await.is_err());
        assert!(topom.create_slot_action(None, 4, 2).await.is_err());

        let s = topom.create_slot_action(None, 0, 2).await.unwrap();
        let a = s.slot(0).unwrap().action.clone().unwrap();
        assert_eq!((a.index, a.state, a.target_id), (1, SlotActionState::Pending, 2));

        let err = topom.create_slot_action(None, 0, 2).await.unwrap_err();
        assert_eq!(err.to_string(), "slot-[0]: already has an action");
    }

    #[tokio::test]
    async fn create_some_takes_lowest_ids_or_nothing() {
        let (topom, _fakes) = test_topom(4).await;
        two_groups(&topom).await;
        assign_slots(&topom, 1, &[0, 1, 2, 3]).await;

        let before = topom.version();
        let err = topom.create_slot_action_some(None, 5, 1, 2).await.unwrap_err();
        assert!(matches!(err, TopomError::Validation { .. }));
        assert_eq!(topom.version(), before);
        assert!(topom.snapshot().slots.iter().all(|m| m.action.is_none()));

        let s = topom.create_slot_action_some(None, 2, 1, 2).await.unwrap();
        let targeted: Vec<u32> = s.slots.iter().filter(|m| m.action.is_some()).map(|m| m.id).collect();
        assert_eq!(targeted, vec![0, 1]);
    }

    #[tokio::test]
    async fn create_range_skips_owned_and_is_atomic() {
        let (topom, _fakes) = test_topom(4).await;
        two_groups(&topom).await;
        assign_slots(&topom, 1, &[0, 1]).await;
        assign_slots(&topom, 2, &[2]).await;

        topom.create_slot_action(None, 3, 1).await.unwrap();
        let before = topom.version();
        assert!(topom.create_slot_action_range(None, 0, 3, 2).await.is_err());
        assert_eq!(topom.version(), before);

        let s = topom.create_slot_action_range(None, 0, 2, 2).await.unwrap();
        assert_eq!(state_of(&s, 0), Some(SlotActionState::Pending));
        assert_eq!(state_of(&s, 1), Some(SlotActionState::Pending));
        assert_eq!(state_of(&s, 2), None);
        assert!(topom.create_slot_action_range(None, 2, 1, 2).await.is_err());
        assert!(topom.create_slot_action_range(None, 0, 4, 2).await.is_err());
    }

    #[tokio::test]
    async fn only_pending_actions_are_removable() {
        let (topom, _fakes) = test_topom(4).await;
        two_groups(&topom).await;
        assign_slots(&topom, 1, &[0, 1, 2, 3]).await;
        topom.create_slot_action(None, 0, 2).await.unwrap();
        topom.create_slot_action(None, 1, 2).await.unwrap();

        assert_eq!(topom.prepare_slot_action().await.unwrap(), Some(0));
        let err = topom.remove_slot_action(None, 0).await.unwrap_err();
        assert_eq!(err.to_string(), "slot-[0]: action is migrating");

        let s = topom.remove_slot_action(None, 1).await.unwrap();
        assert!(s.slot(1).unwrap().action.is_none());
        assert!(topom.remove_slot_action(None, 1).await.is_err());
    }

    #[tokio::test]
    async fn driver_migrates_lowest_ids_one_at_a_time() {
        let (topom, fakes) = test_topom(4).await;
        two_groups(&topom).await;
        assign_slots(&topom, 1, &[0, 1, 2, 3]).await;
        topom.set_slot_action_interval(None, 0).await.unwrap();
        fakes.server.set_keys(0, 5);
        fakes.server.set_keys(1, 3);

        topom.create_slot_action_some(None, 2, 1, 2).await.unwrap();
        assert_eq!(topom.process_slot_actions().await.unwrap(), 2);

        let s = topom.snapshot();
        let owners: Vec<u32> = s.slots.iter().map(|m| m.group_id).collect();
        assert_eq!(owners, vec![2, 2, 1, 1]);
        assert!(s.slots.iter().all(|m| m.action.is_none()));
        assert_eq!(fakes.server.max_in_flight(), 1);
        assert_eq!(topom.progress().executor(), None);
        assert!(!topom.progress().snapshot().failed);
    }

    #[tokio::test]
    async fn at_most_one_slot_is_in_flight() {
        let (topom, _fakes) = test_topom(4).await;
        two_groups(&topom).await;
        assign_slots(&topom, 1, &[0, 1, 2, 3]).await;
        topom.create_slot_action_some(None, 3, 1, 2).await.unwrap();

        assert_eq!(topom.prepare_slot_action().await.unwrap(), Some(0));
        assert_eq!(topom.prepare_slot_action().await.unwrap(), Some(0));
        let s = topom.snapshot();
        let migrating = s
            .slots
            .iter()
            .filter(|m| m.action_state() == Some(SlotActionState::Migrating))
            .count();
        assert_eq!(migrating, 1);
    }

    #[tokio::test]
    async fn failed_move_stays_migrating_and_resumes() {
        let (topom, fakes) = test_topom(4).await;
        two_groups(&topom).await;
        assign_slots(&topom, 1, &[0, 1, 2, 3]).await;
        topom.set_slot_action_interval(None, 0).await.unwrap();
        topom.create_slot_action(None, 0, 2).await.unwrap();
        fakes.server.fail("10.0.0.1:6379");

        let err = topom.process_slot_actions().await.unwrap_err();
        assert!(matches!(err, TopomError::External { .. }));
        assert_eq!(state_of(&topom.snapshot(), 0), Some(SlotActionState::Migrating));

        fakes.server.heal("10.0.0.1:6379");
        assert_eq!(topom.process_slot_actions().await.unwrap(), 1);
        assert_eq!(topom.snapshot().slot(0).unwrap().group_id, 2);
    }

    #[tokio::test]
    async fn disabled_driver_does_nothing() {
        let (topom, _fakes) = test_topom(4).await;
        two_groups(&topom).await;
        assign_slots(&topom, 1, &[0]).await;
        topom.create_slot_action(None, 0, 2).await.unwrap();
        topom.set_slot_action_disabled(None, true).await.unwrap();

        assert_eq!(topom.process_slot_actions().await.unwrap(), 0);
        assert_eq!(state_of(&topom.snapshot(), 0), Some(SlotActionState::Pending));

        topom.set_slot_action_disabled(None, false).await.unwrap();
        topom.set_slot_action_interval(None, 0).await.unwrap();
        assert_eq!(topom.process_slot_actions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn interval_is_bounded() {
        let (topom, _fakes) = test_topom(4).await;
        assert!(topom
            .set_slot_action_interval(None, MAX_ACTION_INTERVAL_MS + 1)
            .await
            .is_err());
        let s = topom.set_slot_action_interval(None, 250).await.unwrap();
        assert_eq!(s.slot_action.interval_ms, 250);
    }

    #[tokio::test]
    async fn proxies_see_migration_routing() {
        let (topom, fakes) = test_topom(4).await;
        two_groups(&topom).await;
        assign_slots(&topom, 1, &[0]).await;
        topom.create_proxy(None, "10.0.0.20:11080").await.unwrap();
        topom.create_slot_action(None, 0, 2).await.unwrap();

        topom.prepare_slot_action().await.unwrap();
        let routed = fakes.proxy.slot("10.0.0.20:11080", 0).unwrap();
        assert_eq!(routed.backend_addr, "10.0.0.2:6379");
        assert_eq!(routed.migrate_from, "10.0.0.1:6379");

        topom.set_slot_action_interval(None, 0).await.unwrap();
        topom.migrate_slot(0).await.unwrap();
        let routed = fakes.proxy.slot("10.0.0.20:11080", 0).unwrap();
        assert_eq!(routed.backend_addr, "10.0.0.2:6379");
        assert!(routed.migrate_from.is_empty());
    }

    #[tokio::test]
    async fn rebalance_preview_is_stable_and_commit_is_idempotent() {
        let (topom, _fakes) = test_topom(8).await;
        two_groups(&topom).await;
        assign_slots(&topom, 1, &[0, 1, 2, 3, 4, 5, 6, 7]).await;

        let a = topom.rebalance(None, false).await.unwrap();
        let b = topom.rebalance(None, false).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.plan, BTreeMap::from([(4, 2), (5, 2), (6, 2), (7, 2)]));

        let committed = topom.rebalance(Some(a.version), true).await.unwrap();
        assert_eq!(committed.plan, a.plan);
        assert_eq!(committed.version, a.version + 1);

        let again = topom.rebalance(None, false).await.unwrap();
        assert!(again.plan.is_empty());
        let version = topom.version();
        let noop = topom.rebalance(Some(version), true).await.unwrap();
        assert!(noop.plan.is_empty());
        assert_eq!(noop.version, version);
        assert_eq!(topom.version(), version);
    }

    #[tokio::test]
    async fn rebalance_needs_a_group() {
        let (topom, _fakes) = test_topom(4).await;
        assert!(matches!(
            topom.rebalance(None, false).await.unwrap_err(),
            TopomError::Validation { .. }
        ));
    }

    #[tokio::test]
    async fn four_slot_scenario() {
        let (topom, _fakes) = test_topom(4).await;
        topom.create_group(None, 1).await.unwrap();
        topom.add_server(None, 1, "10.0.0.1:6379", "").await.unwrap();
        topom.create_group(None, 2).await.unwrap();
        topom.add_server(None, 2, "10.0.0.2:6379", "").await.unwrap();
        assign_slots(&topom, 1, &[0, 1, 2, 3]).await;
        topom.set_slot_action_interval(None, 0).await.unwrap();

        topom.create_slot_action_some(None, 2, 1, 2).await.unwrap();
        topom.process_slot_actions().await.unwrap();

        let s = topom.snapshot();
        assert_eq!(s.slot(0).unwrap().group_id, 2);
        assert_eq!(s.slot(1).unwrap().group_id, 2);
        assert_eq!(s.slot(2).unwrap().group_id, 1);
        assert_eq!(s.slot(3).unwrap().group_id, 1);
        assert!(s.slots.iter().all(|m| m.action.is_none()));
    }
}
