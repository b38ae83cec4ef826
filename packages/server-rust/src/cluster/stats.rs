//! Observed state of servers, proxies and sentinels.
//!
//! Pollers fan out one task per entity, each bounded by the stats timeout, and
//! overwrite the cache entry with the outcome. A slow entity only ever marks
//! itself `timeout`; the rest of the cycle proceeds. Nothing here is
//! persisted or linearized with topology commits.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::task::JoinSet;
use topom_core::{Health, ProxyStats, SentinelStats, SentinelStatus, ServerStats};
use tracing::{debug, warn};

use super::sentinel::reconcile_runids;
use super::topom::Topom;

// ---------------------------------------------------------------------------
// StatsCache
// ---------------------------------------------------------------------------

/// Latest poll outcome per entity, readable without locks.
#[derive(Debug, Default)]
pub struct StatsCache {
    /// Keyed by server address.
    servers: DashMap<String, Health<ServerStats>>,
    /// Keyed by proxy token.
    proxies: DashMap<String, Health<ProxyStats>>,
    /// Keyed by sentinel address.
    sentinels: DashMap<String, SentinelStatus>,
    /// Group masters merged from every answering sentinel.
    masters: ArcSwap<BTreeMap<u32, String>>,
}

impl StatsCache {
    #[must_use]
    pub fn server(&self, addr: &str) -> Health<ServerStats> {
        self.servers
            .get(addr)
            .map_or(Health::Pending, |h| h.value().clone())
    }

    #[must_use]
    pub fn proxy(&self, token: &str) -> Health<ProxyStats> {
        self.proxies
            .get(token)
            .map_or(Health::Pending, |h| h.value().clone())
    }

    #[must_use]
    pub fn sentinel(&self, addr: &str) -> SentinelStatus {
        self.sentinels
            .get(addr)
            .map_or_else(pending_sentinel, |s| s.value().clone())
    }

    /// Run id a server reported on its last healthy poll.
    #[must_use]
    pub fn run_id(&self, addr: &str) -> Option<String> {
        self.servers
            .get(addr)
            .and_then(|h| h.stats().map(|s| s.run_id.clone()))
            .filter(|r| !r.is_empty())
    }

    #[must_use]
    pub fn ha_masters(&self) -> Arc<BTreeMap<u32, String>> {
        self.masters.load_full()
    }

    /// Sentinel-reported master of `gid`, if any sentinel reported one.
    #[must_use]
    pub fn ha_master(&self, gid: u32) -> Option<String> {
        self.masters.load().get(&gid).cloned()
    }

    pub fn set_server(&self, addr: String, health: Health<ServerStats>) {
        self.servers.insert(addr, health);
    }

    pub fn set_proxy(&self, token: String, health: Health<ProxyStats>) {
        self.proxies.insert(token, health);
    }

    pub fn set_sentinel(&self, addr: String, status: SentinelStatus) {
        self.sentinels.insert(addr, status);
    }

    pub fn set_ha_masters(&self, masters: BTreeMap<u32, String>) {
        self.masters.store(Arc::new(masters));
    }

    pub fn forget_proxy(&self, token: &str) {
        self.proxies.remove(token);
    }

    /// Drops entries of entities no longer in the topology.
    fn retain_servers(&self, live: &HashSet<String>) {
        self.servers.retain(|addr, _| live.contains(addr));
    }

    fn retain_proxies(&self, live: &HashSet<String>) {
        self.proxies.retain(|token, _| live.contains(token));
    }

    fn retain_sentinels(&self, live: &HashSet<String>) {
        self.sentinels.retain(|addr, _| live.contains(addr));
    }
}

fn pending_sentinel() -> SentinelStatus {
    SentinelStatus {
        health: Health::Pending,
        summary: None,
        runid_errors: Vec::new(),
        runid_error: String::new(),
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Runs one poll under `timeout` and classifies the outcome.
async fn poll<T, F>(timeout: Duration, fut: F) -> Health<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(stats)) => Health::Healthy {
            stats,
            unix_ms: unix_ms(),
        },
        Ok(Err(e)) => Health::Error {
            message: format!("{e:#}"),
        },
        Err(_) => Health::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        },
    }
}

fn count_failure<T>(kind: &'static str, key: &str, health: &Health<T>) {
    if !matches!(health, Health::Healthy { .. }) {
        metrics::counter!("topom_poll_errors_total", "kind" => kind).increment(1);
        debug!(kind, key, status = health.label(), "poll failed");
    }
}

impl Topom {
    /// Polls `INFO` of every group member.
    pub async fn refresh_server_stats(&self) {
        let snapshot = self.store.read();
        let timeout = self.config.stats_timeout();
        let mut tasks = JoinSet::new();
        let mut live = HashSet::new();
        for s in snapshot.groups.values().flat_map(|g| g.servers.iter()) {
            live.insert(s.server.clone());
            let client = Arc::clone(&self.clients.server);
            let addr = s.server.clone();
            tasks.spawn(async move {
                let health = poll(timeout, async {
                    client.info(&addr).await.map(ServerStats::from_info)
                })
                .await;
                (addr, health)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((addr, health)) => {
                    count_failure("server", &addr, &health);
                    self.stats.set_server(addr, health);
                }
                Err(e) => warn!(error = %e, "server poll task failed"),
            }
        }
        self.stats.retain_servers(&live);
    }

    /// Polls runtime stats of every proxy.
    pub async fn refresh_proxy_stats(&self) {
        let snapshot = self.store.read();
        let timeout = self.config.stats_timeout();
        let mut tasks = JoinSet::new();
        for proxy in snapshot.proxies.values() {
            let client = Arc::clone(&self.clients.proxy);
            let proxy = proxy.clone();
            tasks.spawn(async move {
                let health = poll(timeout, client.stats(&proxy)).await;
                (proxy.token, health)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((token, health)) => {
                    count_failure("proxy", &token, &health);
                    self.stats.set_proxy(token, health);
                }
                Err(e) => warn!(error = %e, "proxy poll task failed"),
            }
        }
        let live = snapshot.proxies.keys().cloned().collect();
        self.stats.retain_proxies(&live);
    }

    /// Polls every sentinel, reconciles reported run ids against the server
    /// stats cache, and merges the reported masters.
    ///
    /// Run after [`refresh_server_stats`](Self::refresh_server_stats) so the
    /// expected run ids are current.
    pub async fn refresh_sentinel_stats(&self) {
        let snapshot = self.store.read();
        let timeout = self.config.stats_timeout();
        let mut tasks = JoinSet::new();
        for (order, addr) in snapshot.sentinel.servers.iter().enumerate() {
            let client = Arc::clone(&self.clients.sentinel);
            let addr = addr.clone();
            tasks.spawn(async move {
                let health = poll(timeout, async {
                    client
                        .report(&addr)
                        .await
                        .map(|report| SentinelStats { report })
                })
                .await;
                (order, addr, health)
            });
        }

        let mut answers = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(answer) => answers.push(answer),
                Err(e) => warn!(error = %e, "sentinel poll task failed"),
            }
        }
        answers.sort_by_key(|(order, _, _)| *order);

        let mut masters = BTreeMap::new();
        for (_, addr, health) in answers {
            count_failure("sentinel", &addr, &health);
            let status = match health.stats() {
                Some(stats) => {
                    for (gid, m) in &stats.report.masters {
                        if !m.addr.is_empty() {
                            masters.insert(*gid, m.addr.clone());
                        }
                    }
                    let summary = stats.summary();
                    let runid_errors =
                        reconcile_runids(&snapshot, &stats.report, |a| self.stats.run_id(a));
                    SentinelStatus {
                        summary: Some(summary),
                        runid_error: SentinelStatus::render_runid_error(&runid_errors),
                        runid_errors,
                        health,
                    }
                }
                None => SentinelStatus {
                    health,
                    ..pending_sentinel()
                },
            };
            if !status.runid_errors.is_empty() {
                debug!(sentinel = %addr, error = %status.runid_error, "run id divergence");
            }
            self.stats.set_sentinel(addr, status);
        }
        let live = snapshot.sentinel.servers.iter().cloned().collect();
        self.stats.retain_sentinels(&live);
        self.stats.set_ha_masters(masters.clone());

        if self.config.follow_failover && !masters.is_empty() {
            if let Err(e) = self.switch_masters(&masters).await {
                warn!(error = %e, "failed to follow sentinel failover");
            }
        }
    }

    /// One full poll cycle: servers and proxies concurrently, then sentinels.
    pub async fn refresh_stats(&self) {
        tokio::join!(self.refresh_server_stats(), self.refresh_proxy_stats());
        self.refresh_sentinel_stats().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
