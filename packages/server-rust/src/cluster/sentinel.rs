//! Sentinel reconciler: membership, resync, failover catch-up and run id
//! divergence detection.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use topom_core::{
    is_valid_server_addr, MismatchKind, RunIdMismatch, SentinelReport, Snapshot,
};
use tracing::{info, warn};

use super::error::{proxy_entity, sentinel_entity, TopomError, TopomResult};
use super::topom::{bounded, join_all_ok, Topom};

/// Compares what one sentinel reports against the run ids the group members
/// reported themselves.
///
/// Every group of the topology is checked, whether the sentinel monitors it
/// or not:
/// - `[+]` for each node the sentinel lists whose run id no member reported
///   (an empty run id always counts);
/// - `[-]` for each member run id the sentinel does not list.
///
/// Members with no known run id are not expected. Every divergence is
/// returned, sorted.
pub fn reconcile_runids<F>(
    snapshot: &Snapshot,
    report: &SentinelReport,
    run_id: F,
) -> Vec<RunIdMismatch>
where
    F: Fn(&str) -> Option<String>,
{
    let mut found = BTreeSet::new();
    for g in snapshot.groups.values() {
        let members: Vec<(&str, String)> = g
            .servers
            .iter()
            .filter_map(|s| run_id(&s.server).map(|r| (s.server.as_str(), r)))
            .collect();
        let expected: HashSet<&str> = members.iter().map(|(_, r)| r.as_str()).collect();

        let view = report.groups.get(&g.id);
        let reported: HashSet<&str> = view
            .into_iter()
            .flat_map(|v| v.nodes())
            .map(|n| n.runid.as_str())
            .collect();

        for node in view.into_iter().flat_map(|v| v.nodes()) {
            if node.runid.is_empty() || !expected.contains(node.runid.as_str()) {
                found.insert(RunIdMismatch {
                    group_id: g.id,
                    kind: MismatchKind::Unexpected,
                    server: node.addr.clone(),
                    runid: node.runid.clone(),
                });
            }
        }
        for (addr, runid) in &members {
            if !reported.contains(runid.as_str()) {
                found.insert(RunIdMismatch {
                    group_id: g.id,
                    kind: MismatchKind::Missing,
                    server: (*addr).to_string(),
                    runid: runid.clone(),
                });
            }
        }
    }
    found.into_iter().collect()
}

impl Topom {
    /// Registers a sentinel after checking it is reachable and writable.
    ///
    /// # Errors
    ///
    /// Validation errors for a malformed or duplicate address, or the
    /// external error of the config flush.
    pub async fn add_sentinel(&self, expected: Option<u64>, addr: &str) -> TopomResult<Arc<Snapshot>> {
        let mut txn = self.store.begin(expected).await?;
        let snapshot = txn.snapshot();
        if !is_valid_server_addr(addr) {
            return Err(TopomError::validation(
                sentinel_entity(addr),
                "invalid sentinel address",
            ));
        }
        if snapshot.sentinel.servers.iter().any(|s| s == addr) {
            return Err(TopomError::validation(sentinel_entity(addr), "already exists"));
        }

        self.call(sentinel_entity(addr), self.clients.sentinel.flush_config(addr))
            .await?;

        let (next, ()) = txn
            .commit(|s| {
                s.sentinel.servers.push(addr.to_string());
                s.sentinel.out_of_sync = true;
                Ok(())
            })
            .await?;
        info!(sentinel = addr, "sentinel added");
        Ok(next)
    }

    /// Unregisters a sentinel, first asking it to stop monitoring this
    /// cluster. With `force` a failing sentinel is removed anyway.
    ///
    /// # Errors
    ///
    /// Validation error if the sentinel is unknown; the external error if it
    /// cannot be cleaned up and `force` is not set.
    pub async fn del_sentinel(
        &self,
        expected: Option<u64>,
        addr: &str,
        force: bool,
    ) -> TopomResult<Arc<Snapshot>> {
        let mut txn = self.store.begin(expected).await?;
        let snapshot = txn.snapshot();
        if !snapshot.sentinel.servers.iter().any(|s| s == addr) {
            return Err(TopomError::validation(sentinel_entity(addr), "doesn't exist"));
        }

        if let Err(e) = self
            .call(sentinel_entity(addr), self.clients.sentinel.remove_groups(addr))
            .await
        {
            if !force {
                return Err(e);
            }
            warn!(sentinel = addr, error = %e, "sentinel cleanup failed, removing anyway");
        }

        let (next, ()) = txn
            .commit(|s| {
                s.sentinel.servers.retain(|x| x != addr);
                s.sentinel.out_of_sync = true;
                Ok(())
            })
            .await?;
        info!(sentinel = addr, force, "sentinel removed");
        Ok(next)
    }

    /// Re-registers every group on every sentinel at its expected master and
    /// tells every proxy which sentinels to follow.
    ///
    /// Clears `out_of_sync` on the sentinel model and on every group only if
    /// all of that succeeded.
    ///
    /// # Errors
    ///
    /// The first external error; nothing is committed in that case.
    pub async fn resync_sentinels(&self, expected: Option<u64>) -> TopomResult<Arc<Snapshot>> {
        let mut txn = self.store.begin(expected).await?;
        let snapshot = txn.snapshot();
        let masters = Arc::new(snapshot.group_masters());
        let timeout = self.config.external_timeout();

        let mut tasks = JoinSet::new();
        for addr in &snapshot.sentinel.servers {
            let client = Arc::clone(&self.clients.sentinel);
            let addr = addr.clone();
            let masters = Arc::clone(&masters);
            let monitor = self.config.sentinel.clone();
            tasks.spawn(async move {
                let target = sentinel_entity(&addr);
                bounded(target.clone(), timeout, client.remove_groups(&addr)).await?;
                bounded(target, timeout, client.monitor_groups(&addr, &masters, &monitor)).await
            });
        }
        join_all_ok(tasks).await?;

        let mut tasks = JoinSet::new();
        for proxy in snapshot.proxies.values() {
            let client = Arc::clone(&self.clients.proxy);
            let proxy = proxy.clone();
            let model = snapshot.sentinel.clone();
            tasks.spawn(async move {
                bounded(
                    proxy_entity(&proxy.token),
                    timeout,
                    client.set_sentinels(&proxy, &model),
                )
                .await
            });
        }
        join_all_ok(tasks).await?;

        let (next, ()) = txn
            .commit(|s| {
                s.sentinel.out_of_sync = false;
                for g in s.groups.values_mut() {
                    g.out_of_sync = false;
                }
                Ok(())
            })
            .await?;
        info!(
            sentinels = next.sentinel.servers.len(),
            groups = masters.len(),
            "sentinels resynced"
        );
        Ok(next)
    }

    /// Follows a failover the sentinels performed: every group whose reported
    /// master is one of its replicas gets that replica moved to index 0.
    ///
    /// Groups that are promoting, unknown, or already agree are left alone.
    ///
    /// # Errors
    ///
    /// Store errors only; routing push failures are logged.
    pub async fn switch_masters(&self, masters: &BTreeMap<u32, String>) -> TopomResult<()> {
        let mut txn = self.store.begin(None).await?;
        let snapshot = txn.snapshot();
        let switches: Vec<(u32, usize)> = masters
            .iter()
            .filter_map(|(&gid, addr)| {
                let g = snapshot.group(gid)?;
                if g.is_promoting() {
                    return None;
                }
                g.index_of(addr).filter(|&i| i > 0).map(|i| (gid, i))
            })
            .collect();
        if switches.is_empty() {
            return Ok(());
        }

        let (next, ()) = txn
            .commit(|s| {
                for &(gid, index) in &switches {
                    if let Some(g) = s.group_mut(gid) {
                        let server = g.servers.remove(index);
                        g.servers.insert(0, server);
                        g.out_of_sync = true;
                    }
                }
                Ok(())
            })
            .await?;
        for &(gid, _) in &switches {
            info!(
                group = gid,
                master = next.group_master(gid).unwrap_or_default(),
                "followed sentinel failover"
            );
            self.push_group_slots_best_effort(&next, gid).await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
