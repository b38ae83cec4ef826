//! The orchestrator facade.
//!
//! `Topom` owns the topology store, the collaborator clients, the stats cache
//! and the driver progress. Its operations are split by concern across the
//! sibling modules (`slots`, `groups`, `sentinel`, `proxies`, `stats`); this
//! module holds construction, the capability token, bounded external calls,
//! routing pushes and the status feed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::task::JoinSet;
use topom_core::{
    GroupSection, HaStatus, ProxySection, SentinelSection, ServerStatus, SlotActionSection,
    Snapshot, StatusFeed,
};
use tracing::warn;

use super::context;
use super::error::{proxy_entity, TopomError, TopomResult};
use super::state::TopologyStore;
use super::stats::StatsCache;
use super::traits::Clients;
use super::types::{ActionProgress, ClusterConfig};
use crate::storage::SnapshotStore;

/// Derives the capability token admin callers must present.
///
/// Hex SHA-256 of the product name and auth, truncated to 32 characters.
#[must_use]
pub fn derive_xauth(product_name: &str, product_auth: &str) -> String {
    let digest = Sha256::digest(format!("Topom-XAuth-[{product_name}]-[{product_auth}]"));
    let mut token = hex::encode(digest);
    token.truncate(32);
    token
}

// ---------------------------------------------------------------------------
// Topom
// ---------------------------------------------------------------------------

pub struct Topom {
    pub(super) store: TopologyStore,
    pub(super) clients: Clients,
    pub(super) config: ClusterConfig,
    pub(super) stats: StatsCache,
    pub(super) progress: ActionProgress,
    xauth: String,
}

impl std::fmt::Debug for Topom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topom")
            .field("store", &self.store)
            .field("product_name", &self.config.product_name)
            .finish_non_exhaustive()
    }
}

impl Topom {
    /// Opens (or initializes) the persisted topology and wires the clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot backend cannot be read or written.
    pub async fn open(
        config: ClusterConfig,
        persistence: Arc<dyn SnapshotStore>,
        clients: Clients,
    ) -> anyhow::Result<Self> {
        let store =
            TopologyStore::open(persistence, &config.product_name, config.slot_count).await?;
        Ok(Self::new(config, store, clients))
    }

    #[must_use]
    pub fn new(config: ClusterConfig, store: TopologyStore, clients: Clients) -> Self {
        let xauth = derive_xauth(&config.product_name, &config.product_auth);
        Self {
            store,
            clients,
            config,
            stats: StatsCache::default(),
            progress: ActionProgress::new(),
            xauth,
        }
    }

    #[must_use]
    pub fn store(&self) -> &TopologyStore {
        &self.store
    }

    /// Last committed snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.read()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.store.version()
    }

    #[must_use]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> &StatsCache {
        &self.stats
    }

    #[must_use]
    pub fn progress(&self) -> &ActionProgress {
        &self.progress
    }

    #[must_use]
    pub fn xauth(&self) -> &str {
        &self.xauth
    }

    /// Constant-time comparison against the capability token.
    #[must_use]
    pub fn verify_xauth(&self, candidate: &str) -> bool {
        self.xauth.as_bytes().ct_eq(candidate.as_bytes()).into()
    }

    /// Stops accepting mutations. Reads and the status feed keep working.
    pub fn close(&self) {
        self.store.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }

    // -- external calls -----------------------------------------------------

    /// Runs one external call under the configured timeout.
    pub(super) async fn call<T, F>(&self, target: String, fut: F) -> TopomResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        bounded(target, self.config.external_timeout(), fut).await
    }

    /// Pushes the routing of `sids` to every proxy of `snapshot`, concurrently.
    ///
    /// # Errors
    ///
    /// [`TopomError::External`] naming the first proxy that failed, after all
    /// pushes have finished.
    pub(super) async fn push_slots(&self, snapshot: &Snapshot, sids: &[u32]) -> TopomResult<()> {
        if sids.is_empty() || snapshot.proxies.is_empty() {
            return Ok(());
        }
        let timeout = self.config.external_timeout();
        let mut tasks = JoinSet::new();
        for proxy in snapshot.proxies.values() {
            let slots = context::to_slots(snapshot, sids, Some(proxy));
            let client = Arc::clone(&self.clients.proxy);
            let proxy = proxy.clone();
            tasks.spawn(async move {
                let target = proxy_entity(&proxy.token);
                bounded(target, timeout, client.fill_slots(&proxy, &slots)).await
            });
        }
        join_all_ok(tasks).await
    }

    /// Pushes the routing of every slot that reads from or writes to `gid`.
    pub(super) async fn push_group_slots(&self, snapshot: &Snapshot, gid: u32) -> TopomResult<()> {
        let sids = context::slot_ids_of_group(snapshot, gid);
        self.push_slots(snapshot, &sids).await
    }

    /// Like [`push_group_slots`](Self::push_group_slots), but only logs failures.
    pub(super) async fn push_group_slots_best_effort(&self, snapshot: &Snapshot, gid: u32) {
        if let Err(e) = self.push_group_slots(snapshot, gid).await {
            warn!(group = gid, error = %e, "routing push failed, proxies need reinit");
        }
    }

    // -- status feed --------------------------------------------------------

    /// Builds the admin status document from one snapshot and the stats cache.
    #[must_use]
    pub fn status(&self) -> StatusFeed {
        let snapshot = self.store.read();
        let masters = self.stats.ha_masters();

        let mut group = GroupSection {
            models: snapshot.groups.values().cloned().collect(),
            ..GroupSection::default()
        };
        for g in snapshot.groups.values() {
            let reported = masters.get(&g.id).map(String::as_str);
            for (i, s) in g.servers.iter().enumerate() {
                let health = self.stats.server(&s.server);
                let expected_master = if i == 0 { None } else { g.master() };
                let replication_ok = health
                    .stats()
                    .map(|st| st.replication_matches(expected_master));
                group.stats.insert(
                    s.server.clone(),
                    ServerStatus {
                        health,
                        ha_status: HaStatus::classify(i, &s.server, reported),
                        replication_ok,
                    },
                );
            }
        }

        let proxy = ProxySection {
            models: snapshot.proxies.values().cloned().collect(),
            stats: snapshot
                .proxies
                .keys()
                .map(|token| (token.clone(), self.stats.proxy(token)))
                .collect(),
        };

        let sentinels = SentinelSection {
            model: snapshot.sentinel.clone(),
            stats: snapshot
                .sentinel
                .servers
                .iter()
                .map(|addr| (addr.clone(), self.stats.sentinel(addr)))
                .collect(),
            masters: (*masters).clone(),
        };

        StatusFeed {
            version: snapshot.version,
            closed: self.is_closed(),
            product_name: snapshot.product_name.clone(),
            slots: snapshot.slots.clone(),
            group,
            proxy,
            slot_action: SlotActionSection {
                interval: snapshot.slot_action.interval_ms,
                disabled: snapshot.slot_action.disabled,
                progress: self.progress.snapshot(),
                executor: self.progress.executor(),
            },
            sentinels,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Awaits `fut` for at most `timeout`, mapping failures onto [`TopomError`].
pub(super) async fn bounded<T, F>(target: String, timeout: Duration, fut: F) -> TopomResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(TopomError::external(target, e)),
        Err(_) => Err(TopomError::Timeout {
            target,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Drains a join set, returning the first error once every task finished.
pub(super) async fn join_all_ok(mut tasks: JoinSet<TopomResult<()>>) -> TopomResult<()> {
    let mut first = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.unwrap_or_else(|e| Err(TopomError::external("task", e)));
        if let Err(e) = result {
            warn!(error = %e, "external call failed");
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use topom_core::{GroupServer, Health, ServerStats};

    use super::*;
    use crate::testing::{test_topom, Fakes};

    #[test]
    fn xauth_is_stable_and_truncated() {
        let a = derive_xauth("demo", "secret");
        assert_eq!(a.len(), 32);
        assert_eq!(a, derive_xauth("demo", "secret"));
        assert_ne!(a, derive_xauth("demo", "other"));
        assert_ne!(a, derive_xauth("other", "secret"));
    }

    #[tokio::test]
    async fn verify_xauth_compares_whole_token() {
        let (topom, _fakes) = test_topom(4).await;
        let token = topom.xauth().to_string();
        assert!(topom.verify_xauth(&token));
        assert!(!topom.verify_xauth(&token[..31]));
        assert!(!topom.verify_xauth(""));
    }

    #[tokio::test]
    async fn bounded_maps_timeout_and_errors() {
        let err = bounded("server-[a:1]".to_string(), Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, TopomError::Timeout { timeout_ms: 5, .. }));

        let err = bounded::<(), _>("server-[a:1]".to_string(), Duration::from_secs(1), async {
            Err(anyhow::anyhow!("refused"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "server-[a:1]: refused");
    }

    #[tokio::test]
    async fn status_feed_reflects_one_snapshot() {
        let (topom, fakes): (_, Fakes) = test_topom(4).await;
        topom.create_group(None, 1).await.unwrap();
        topom.add_server(None, 1, "10.0.0.1:6379", "").await.unwrap();
        topom.add_server(None, 1, "10.0.0.2:6379", "").await.unwrap();
        fakes.server.set_master_of("10.0.0.2:6379", Some("10.0.0.1:6379"));
        topom.refresh_server_stats().await;

        let feed = topom.status();
        assert_eq!(feed.version, topom.version());
        assert_eq!(feed.slots.len(), 4);
        assert_eq!(feed.group.models.len(), 1);
        assert_eq!(feed.group.models[0].servers[0], GroupServer::new("10.0.0.1:6379", ""));

        let replica = &feed.group.stats["10.0.0.2:6379"];
        assert!(matches!(replica.health, Health::Healthy { .. }));
        assert_eq!(replica.ha_status, HaStatus::Undefined);
        assert_eq!(replica.replication_ok, Some(true));
        assert_eq!(feed.slot_action.executor, None);
        assert!(!feed.closed);
    }

    #[tokio::test]
    async fn status_feed_marks_unpolled_servers_pending() {
        let (topom, _fakes) = test_topom(4).await;
        topom.create_group(None, 1).await.unwrap();
        topom.add_server(None, 1, "10.0.0.1:6379", "").await.unwrap();
        let feed = topom.status();
        let status = &feed.group.stats["10.0.0.1:6379"];
        assert_eq!(status.health, Health::<ServerStats>::Pending);
        assert_eq!(status.replication_ok, None);
    }
}
