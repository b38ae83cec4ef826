//! Group reconciler: membership, promotion, sync actions, resync and the
//! replica read policy.

use std::sync::Arc;

use tokio::task::JoinSet;
use topom_core::{
    is_valid_server_addr, Group, GroupServer, Promoting, PromotingState, ServerAction,
    ServerActionState, Snapshot, MAX_GROUP_ID,
};
use tracing::{info, warn};

use super::context;
use super::error::{group_entity, server_entity, TopomError, TopomResult};
use super::state::Transaction;
use super::topom::{bounded, join_all_ok, Topom};

/// Looks up a group or fails with a validation error.
fn group_of(snapshot: &Snapshot, gid: u32) -> TopomResult<&Group> {
    snapshot
        .group(gid)
        .ok_or_else(|| TopomError::validation(group_entity(gid), "doesn't exist"))
}

fn not_promoting(g: &Group) -> TopomResult<()> {
    if g.is_promoting() {
        return Err(TopomError::validation(group_entity(g.id), "is promoting"));
    }
    Ok(())
}

/// Flags the layout change for the next sentinel resync.
fn mark_out_of_sync(s: &mut Snapshot, gid: u32) {
    if let Some(g) = s.group_mut(gid) {
        g.out_of_sync = true;
    }
    if !s.sentinel.servers.is_empty() {
        s.sentinel.out_of_sync = true;
    }
}

impl Topom {
    // -- membership ---------------------------------------------------------

    /// # Errors
    ///
    /// Validation error if `gid` is out of range or taken.
    pub async fn create_group(&self, expected: Option<u64>, gid: u32) -> TopomResult<Arc<Snapshot>> {
        if !(1..=MAX_GROUP_ID).contains(&gid) {
            return Err(TopomError::validation(group_entity(gid), "invalid group id"));
        }
        let (next, ()) = self
            .store
            .commit(expected, |s| {
                if s.groups.contains_key(&gid) {
                    return Err(TopomError::validation(group_entity(gid), "already exists"));
                }
                s.groups.insert(gid, Group::new(gid));
                Ok(())
            })
            .await?;
        info!(group = gid, "group created");
        Ok(next)
    }

    /// # Errors
    ///
    /// Validation error unless the group exists, has no servers and no slot
    /// refers to it.
    pub async fn remove_group(&self, expected: Option<u64>, gid: u32) -> TopomResult<Arc<Snapshot>> {
        let (next, ()) = self
            .store
            .commit(expected, |s| {
                let g = group_of(s, gid)?;
                if !g.servers.is_empty() {
                    return Err(TopomError::validation(group_entity(gid), "isn't empty"));
                }
                if s.is_group_in_use(gid) {
                    return Err(TopomError::validation(group_entity(gid), "is still in use"));
                }
                s.groups.remove(&gid);
                Ok(())
            })
            .await?;
        info!(group = gid, "group removed");
        Ok(next)
    }

    /// Appends a server to a group; it becomes the master if the group was empty.
    ///
    /// # Errors
    ///
    /// Validation error for a malformed address, a missing or promoting
    /// group, or an address that already belongs to any group.
    pub async fn add_server(
        &self,
        expected: Option<u64>,
        gid: u32,
        addr: &str,
        datacenter: &str,
    ) -> TopomResult<Arc<Snapshot>> {
        if !is_valid_server_addr(addr) {
            return Err(TopomError::validation(server_entity(addr), "invalid server address"));
        }
        let (next, ()) = self
            .store
            .commit(expected, |s| {
                not_promoting(group_of(s, gid)?)?;
                if let Some((owner, _)) = s.group_by_server(addr) {
                    return Err(TopomError::validation(
                        server_entity(addr),
                        format!("already exists in {}", group_entity(owner.id)),
                    ));
                }
                if let Some(g) = s.group_mut(gid) {
                    g.servers.push(GroupServer::new(addr, datacenter));
                }
                mark_out_of_sync(s, gid);
                Ok(())
            })
            .await?;
        info!(group = gid, server = addr, "server added");
        Ok(next)
    }

    /// Removes a server from its group.
    ///
    /// Refused while the group is promoting, while the server is syncing, when
    /// the server is the master of a group that still serves slots, and,
    /// unless `allow_conflict`, when sentinels report it as the group's master.
    ///
    /// # Errors
    ///
    /// Validation errors only.
    pub async fn remove_server(
        &self,
        expected: Option<u64>,
        gid: u32,
        addr: &str,
        allow_conflict: bool,
    ) -> TopomResult<Arc<Snapshot>> {
        let ha_master = self.stats.ha_master(gid);
        let (next, ()) = self
            .store
            .commit(expected, |s| {
                let g = group_of(s, gid)?;
                not_promoting(g)?;
                let index = g.index_of(addr).ok_or_else(|| {
                    TopomError::validation(
                        server_entity(addr),
                        format!("doesn't exist in {}", group_entity(gid)),
                    )
                })?;
                if g.servers[index]
                    .action
                    .is_some_and(|a| a.state == ServerActionState::Syncing)
                {
                    return Err(TopomError::validation(server_entity(addr), "is syncing"));
                }
                if index == 0 && s.is_group_in_use(gid) {
                    return Err(TopomError::validation(
                        group_entity(gid),
                        "can't remove master, still in use",
                    ));
                }
                if !allow_conflict && ha_master.as_deref() == Some(addr) {
                    return Err(TopomError::validation(
                        server_entity(addr),
                        "is the master reported by sentinels (ha conflict)",
                    ));
                }
                if let Some(g) = s.group_mut(gid) {
                    g.servers.remove(index);
                }
                mark_out_of_sync(s, gid);
                Ok(())
            })
            .await?;
        info!(group = gid, server = addr, allow_conflict, "server removed");
        Ok(next)
    }

    // -- promotion ----------------------------------------------------------

    /// Makes `addr` the master of its group.
    ///
    /// Steps, each committed before the next starts:
    /// 1. `pending` is recorded;
    /// 2. proxies get the group's slots locked, then `prepared` is recorded;
    /// 3. `addr` moves to index 0 (the old master goes last), `finished`;
    /// 4. `addr` is detached, replicas follow it, proxies get the slots
    ///    unlocked, and `promoting` is cleared.
    ///
    /// An external failure stops at the current step with `promoting` still
    /// set; [`promote_commit`](Self::promote_commit) resumes from there.
    ///
    /// # Errors
    ///
    /// Validation errors before step 1; external errors after.
    pub async fn promote_server(
        &self,
        expected: Option<u64>,
        gid: u32,
        addr: &str,
    ) -> TopomResult<Arc<Snapshot>> {
        let mut txn = self.store.begin(expected).await?;
        let snapshot = txn.snapshot();
        let g = group_of(&snapshot, gid)?;
        not_promoting(g)?;
        let index = g.index_of(addr).ok_or_else(|| {
            TopomError::validation(
                server_entity(addr),
                format!("doesn't exist in {}", group_entity(gid)),
            )
        })?;
        if index == 0 {
            return Err(TopomError::validation(server_entity(addr), "is already the master"));
        }
        if g.servers
            .iter()
            .any(|s| s.action.is_some_and(|a| a.state == ServerActionState::Syncing))
        {
            return Err(TopomError::validation(group_entity(gid), "has a syncing server"));
        }
        if snapshot.slots_using_group(gid).any(|m| {
            m.action_state().is_some_and(|st| st.is_in_flight())
        }) {
            return Err(TopomError::validation(group_entity(gid), "is migrating"));
        }

        txn.commit(|s| {
            if let Some(g) = s.group_mut(gid) {
                g.promoting = Some(Promoting {
                    index,
                    state: PromotingState::Pending,
                });
            }
            Ok(())
        })
        .await?;
        info!(group = gid, server = addr, "promotion started");
        self.drive_promotion(&mut txn, gid).await
    }

    /// Resumes an interrupted promotion from its recorded step.
    ///
    /// # Errors
    ///
    /// Validation error if the group is not promoting; otherwise as
    /// [`promote_server`](Self::promote_server).
    pub async fn promote_commit(&self, expected: Option<u64>, gid: u32) -> TopomResult<Arc<Snapshot>> {
        let mut txn = self.store.begin(expected).await?;
        let snapshot = txn.snapshot();
        if !group_of(&snapshot, gid)?.is_promoting() {
            return Err(TopomError::validation(group_entity(gid), "isn't promoting"));
        }
        self.drive_promotion(&mut txn, gid).await
    }

    async fn drive_promotion(&self, txn: &mut Transaction<'_>, gid: u32) -> TopomResult<Arc<Snapshot>> {
        loop {
            let snapshot = txn.snapshot();
            let Some(promoting) = group_of(&snapshot, gid)?.promoting else {
                return Ok(snapshot);
            };
            match promoting.state {
                PromotingState::Pending => {
                    let preview = with_promoting(&snapshot, gid, Some(PromotingState::Prepared));
                    if let Err(e) = self.push_group_slots(&preview, gid).await {
                        warn!(group = gid, error = %e, "lock push failed, rolling proxies back");
                        self.push_group_slots_best_effort(&snapshot, gid).await;
                        return Err(e);
                    }
                    txn.commit(|s| set_promoting(s, gid, PromotingState::Prepared)).await?;
                }
                PromotingState::Prepared => {
                    txn.commit(|s| {
                        if let Some(g) = s.group_mut(gid) {
                            let index = promoting.index;
                            if index > 0 && index < g.servers.len() {
                                let old_master = g.servers.remove(0);
                                let new_master = g.servers.remove(index - 1);
                                g.servers.insert(0, new_master);
                                g.servers.push(old_master);
                            }
                            for server in &mut g.servers {
                                server.action = None;
                            }
                            g.promoting = Some(Promoting {
                                index: 0,
                                state: PromotingState::Finished,
                            });
                        }
                        mark_out_of_sync(s, gid);
                        Ok(())
                    })
                    .await?;
                }
                PromotingState::Finished => {
                    self.repoint_replicas(&snapshot, gid).await;
                    let preview = with_promoting(&snapshot, gid, None);
                    self.push_group_slots(&preview, gid).await?;
                    let (next, ()) = txn
                        .commit(|s| {
                            if let Some(g) = s.group_mut(gid) {
                                g.promoting = None;
                            }
                            Ok(())
                        })
                        .await?;
                    info!(
                        group = gid,
                        master = next.group_master(gid).unwrap_or_default(),
                        "promotion finished"
                    );
                    return Ok(next);
                }
            }
        }
    }

    /// Detaches the master and points every replica at it. Failures are
    /// logged; sync actions or a group resync repair them later.
    async fn repoint_replicas(&self, snapshot: &Snapshot, gid: u32) {
        let Some(g) = snapshot.group(gid) else { return };
        let Some(master) = g.master() else { return };
        for (i, s) in g.servers.iter().enumerate() {
            let target = if i == 0 { None } else { Some(master) };
            let call = self.clients.server.set_master(&s.server, target);
            if let Err(e) = self.call(server_entity(&s.server), call).await {
                warn!(group = gid, server = %s.server, error = %e, "replication update failed");
            }
        }
    }

    // -- sync actions -------------------------------------------------------

    /// Queues a re-attach of `addr` to its group's master.
    ///
    /// # Errors
    ///
    /// Validation error if the server is unknown, its group is promoting, or
    /// it already has a pending or running action.
    pub async fn create_sync_action(&self, expected: Option<u64>, addr: &str) -> TopomResult<Arc<Snapshot>> {
        let (next, ()) = self
            .store
            .commit(expected, |s| {
                let index = s.max_sync_action_index() + 1;
                let (g, i) = s.group_by_server_mut(addr).ok_or_else(|| {
                    TopomError::validation(server_entity(addr), "doesn't exist")
                })?;
                not_promoting(g)?;
                let server = &mut g.servers[i];
                if server
                    .action
                    .is_some_and(|a| a.state != ServerActionState::SyncFailed)
                {
                    return Err(TopomError::validation(server_entity(addr), "action already exists"));
                }
                server.action = Some(ServerAction {
                    index,
                    state: ServerActionState::Pending,
                });
                Ok(())
            })
            .await?;
        info!(server = addr, "sync action created");
        Ok(next)
    }

    /// Drops a sync action that has not started, or one that failed.
    ///
    /// # Errors
    ///
    /// Validation error if the server is unknown, has no action, or is syncing.
    pub async fn remove_sync_action(&self, expected: Option<u64>, addr: &str) -> TopomResult<Arc<Snapshot>> {
        let (next, ()) = self
            .store
            .commit(expected, |s| {
                let (g, i) = s.group_by_server_mut(addr).ok_or_else(|| {
                    TopomError::validation(server_entity(addr), "doesn't exist")
                })?;
                let server = &mut g.servers[i];
                match server.action.map(|a| a.state) {
                    None => Err(TopomError::validation(server_entity(addr), "has no action")),
                    Some(ServerActionState::Syncing) => {
                        Err(TopomError::validation(server_entity(addr), "action is syncing"))
                    }
                    Some(_) => {
                        server.action = None;
                        Ok(())
                    }
                }
            })
            .await?;
        info!(server = addr, "sync action removed");
        Ok(next)
    }

    /// Runs the oldest pending sync action, if any.
    ///
    /// Returns the address that was processed. The action is cleared on
    /// success and left as `sync_failed` otherwise.
    ///
    /// # Errors
    ///
    /// Store errors, or the external error of the replication command (after
    /// `sync_failed` has been recorded).
    pub async fn process_sync_action(&self) -> TopomResult<Option<String>> {
        let (next, picked) = {
            let mut txn = self.store.begin(None).await?;
            let snapshot = txn.snapshot();
            let picked = snapshot
                .groups
                .values()
                .filter(|g| !g.is_promoting())
                .flat_map(|g| g.servers.iter())
                .filter_map(|s| {
                    s.action
                        .filter(|a| a.state == ServerActionState::Pending)
                        .map(|a| (a.index, s.server.clone()))
                })
                .min();
            let Some((_, addr)) = picked else {
                return Ok(None);
            };
            let (next, ()) = txn
                .commit(|s| {
                    if let Some((g, i)) = s.group_by_server_mut(&addr) {
                        if let Some(action) = g.servers[i].action.as_mut() {
                            action.state = ServerActionState::Syncing;
                        }
                    }
                    Ok(())
                })
                .await?;
            (next, addr)
        };

        let master = next.group_by_server(&picked).and_then(|(g, i)| {
            if i == 0 {
                None
            } else {
                g.master().map(str::to_string)
            }
        });
        let result = self
            .call(
                server_entity(&picked),
                self.clients.server.set_master(&picked, master.as_deref()),
            )
            .await;

        self.store
            .commit(None, |s| {
                if let Some((g, i)) = s.group_by_server_mut(&picked) {
                    let server = &mut g.servers[i];
                    server.action = match &result {
                        Ok(()) => None,
                        Err(_) => server.action.map(|a| ServerAction {
                            state: ServerActionState::SyncFailed,
                            ..a
                        }),
                    };
                }
                Ok(())
            })
            .await?;

        match result {
            Ok(()) => {
                info!(server = %picked, master = ?master, "sync action done");
                Ok(Some(picked))
            }
            Err(e) => {
                warn!(server = %picked, error = %e, "sync action failed");
                Err(e)
            }
        }
    }

    // -- resync -------------------------------------------------------------

    /// Points every member at the group's logical master (the master itself
    /// at nobody), regardless of what sentinels report, and re-pushes the
    /// group's routing. Member order is unchanged.
    ///
    /// # Errors
    ///
    /// Validation error for a missing or promoting group; the first external
    /// error after every member was attempted.
    pub async fn resync_group(&self, expected: Option<u64>, gid: u32) -> TopomResult<Arc<Snapshot>> {
        let mut txn = self.store.begin(expected).await?;
        let snapshot = txn.snapshot();
        not_promoting(group_of(&snapshot, gid)?)?;
        self.resync_members(&snapshot, gid).await?;
        self.push_group_slots(&snapshot, gid).await?;
        let (next, ()) = txn
            .commit(|s| {
                if let Some(g) = s.group_mut(gid) {
                    g.out_of_sync = false;
                }
                Ok(())
            })
            .await?;
        info!(group = gid, "group resynced");
        Ok(next)
    }

    /// [`resync_group`](Self::resync_group) for every group that is not promoting.
    ///
    /// # Errors
    ///
    /// The first external error; groups that succeeded are still committed.
    pub async fn resync_all_groups(&self, expected: Option<u64>) -> TopomResult<Arc<Snapshot>> {
        let mut txn = self.store.begin(expected).await?;
        let snapshot = txn.snapshot();
        let mut first = None;
        let mut done = Vec::new();
        for g in snapshot.groups.values().filter(|g| !g.is_promoting()) {
            let result = match self.resync_members(&snapshot, g.id).await {
                Ok(()) => self.push_group_slots(&snapshot, g.id).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => done.push(g.id),
                Err(e) => {
                    warn!(group = g.id, error = %e, "group resync failed");
                    first.get_or_insert(e);
                }
            }
        }
        let (next, ()) = txn
            .commit(|s| {
                for gid in &done {
                    if let Some(g) = s.group_mut(*gid) {
                        g.out_of_sync = false;
                    }
                }
                Ok(())
            })
            .await?;
        first.map_or(Ok(next), Err)
    }

    async fn resync_members(&self, snapshot: &Snapshot, gid: u32) -> TopomResult<()> {
        let g = group_of(snapshot, gid)?;
        let Some(master) = g.master() else {
            return Ok(());
        };
        let timeout = self.config.external_timeout();
        let mut tasks = JoinSet::new();
        for (i, s) in g.servers.iter().enumerate() {
            let client = Arc::clone(&self.clients.server);
            let addr = s.server.clone();
            let target = (i != 0).then(|| master.to_string());
            tasks.spawn(async move {
                bounded(
                    server_entity(&addr),
                    timeout,
                    client.set_master(&addr, target.as_deref()),
                )
                .await
            });
        }
        join_all_ok(tasks).await
    }

    // -- replica groups -----------------------------------------------------

    /// Sets whether `addr` may serve reads for its group's slots.
    ///
    /// # Errors
    ///
    /// Validation error for a missing or promoting group or an unknown server;
    /// the external error if proxies cannot be updated (the flag is kept).
    pub async fn enable_replica_groups(
        &self,
        expected: Option<u64>,
        gid: u32,
        addr: &str,
        value: bool,
    ) -> TopomResult<Arc<Snapshot>> {
        let (next, ()) = self
            .store
            .commit(expected, |s| {
                not_promoting(group_of(s, gid)?)?;
                let g = s
                    .group_mut(gid)
                    .ok_or_else(|| TopomError::validation(group_entity(gid), "doesn't exist"))?;
                let server = g
                    .servers
                    .iter_mut()
                    .find(|x| x.server == addr)
                    .ok_or_else(|| {
                        TopomError::validation(
                            server_entity(addr),
                            format!("doesn't exist in {}", group_entity(gid)),
                        )
                    })?;
                server.replica_group = value;
                Ok(())
            })
            .await?;
        info!(group = gid, server = addr, value, "replica group policy changed");
        self.push_group_slots(&next, gid).await?;
        Ok(next)
    }

    /// Sets the read policy of every server of every group that is not promoting.
    ///
    /// # Errors
    ///
    /// The external error if proxies cannot be updated (the flags are kept).
    pub async fn enable_replica_groups_all(&self, expected: Option<u64>, value: bool) -> TopomResult<Arc<Snapshot>> {
        let (next, ()) = self
            .store
            .commit(expected, |s| {
                for g in s.groups.values_mut().filter(|g| !g.is_promoting()) {
                    for server in &mut g.servers {
                        server.replica_group = value;
                    }
                }
                Ok(())
            })
            .await?;
        info!(value, "replica group policy changed for all groups");
        let all: Vec<u32> = next.slots.iter().map(|m| m.id).collect();
        self.push_slots(&next, &all).await?;
        Ok(next)
    }
}

/// Copy of `snapshot` with `gid`'s promotion state replaced, for pushing the
/// routing a commit would produce before making that commit.
fn with_promoting(snapshot: &Snapshot, gid: u32, state: Option<PromotingState>) -> Snapshot {
    let mut preview = snapshot.clone();
    if let Some(g) = preview.group_mut(gid) {
        g.promoting = match (g.promoting, state) {
            (Some(p), Some(state)) => Some(Promoting { state, ..p }),
            _ => None,
        };
    }
    preview
}

fn set_promoting(s: &mut Snapshot, gid: u32, state: PromotingState) -> TopomResult<()> {
    if let Some(p) = s.group_mut(gid).and_then(|g| g.promoting.as_mut()) {
        p.state = state;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
