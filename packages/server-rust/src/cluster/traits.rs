//! Contracts for the external systems the orchestrator manages.
//!
//! Three collaborator traits, one per kind of managed process:
//! `ServerClient` (storage servers), `ProxyClient` (routing proxies) and
//! `SentinelClient` (failover sentinels). Concrete network implementations
//! live in `crate::clients`; tests substitute in-memory fakes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use topom_core::{Proxy, ProxyModel, ProxyStats, SentinelModel, SentinelReport, Slot};

use super::types::MonitorConfig;

// ---------------------------------------------------------------------------
// ServerClient
// ---------------------------------------------------------------------------

/// Control-plane access to storage servers.
#[async_trait]
pub trait ServerClient: Send + Sync {
    /// Returns the `field -> value` pairs of the server's INFO reply.
    async fn info(&self, addr: &str) -> anyhow::Result<BTreeMap<String, String>>;

    /// Points `addr` at `master`, or detaches it when `master` is `None`.
    async fn set_master(&self, addr: &str, master: Option<&str>) -> anyhow::Result<()>;

    /// Moves one batch of keys of `slot` from `from` to `to`.
    ///
    /// Returns the number of keys still left in the slot on `from`.
    async fn migrate_slot(&self, from: &str, to: &str, slot: u32) -> anyhow::Result<u64>;
}

// ---------------------------------------------------------------------------
// ProxyClient
// ---------------------------------------------------------------------------

/// Admin API of routing proxies.
#[async_trait]
pub trait ProxyClient: Send + Sync {
    /// Fetches the self-description of an unregistered proxy.
    async fn model(&self, admin_addr: &str) -> anyhow::Result<ProxyModel>;

    /// Verifies the proxy accepts this cluster's credentials.
    async fn xping(&self, proxy: &Proxy) -> anyhow::Result<()>;

    /// Replaces the routing entries for the given slots.
    async fn fill_slots(&self, proxy: &Proxy, slots: &[Slot]) -> anyhow::Result<()>;

    /// Marks the proxy online.
    async fn start(&self, proxy: &Proxy) -> anyhow::Result<()>;

    async fn shutdown(&self, proxy: &Proxy) -> anyhow::Result<()>;

    /// Tells the proxy which sentinels to subscribe to for failover events.
    async fn set_sentinels(&self, proxy: &Proxy, sentinel: &SentinelModel) -> anyhow::Result<()>;

    async fn stats(&self, proxy: &Proxy) -> anyhow::Result<ProxyStats>;
}

// ---------------------------------------------------------------------------
// SentinelClient
// ---------------------------------------------------------------------------

/// Control of the sentinels watching this cluster's groups.
#[async_trait]
pub trait SentinelClient: Send + Sync {
    /// Rewrites the sentinel's config file, verifying it is reachable and writable.
    async fn flush_config(&self, addr: &str) -> anyhow::Result<()>;

    /// Stops monitoring every group belonging to this cluster.
    async fn remove_groups(&self, addr: &str) -> anyhow::Result<()>;

    /// Starts monitoring each group at its expected master.
    async fn monitor_groups(
        &self,
        addr: &str,
        masters: &BTreeMap<u32, String>,
        config: &MonitorConfig,
    ) -> anyhow::Result<()>;

    /// Reads the sentinel's current view of this cluster's groups.
    async fn report(&self, addr: &str) -> anyhow::Result<SentinelReport>;
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

/// Bundle of collaborator handles shared by the orchestrator and its workers.
#[derive(Clone)]
pub struct Clients {
    pub server: Arc<dyn ServerClient>,
    pub proxy: Arc<dyn ProxyClient>,
    pub sentinel: Arc<dyn SentinelClient>,
}

impl std::fmt::Debug for Clients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clients").finish_non_exhaustive()
    }
}
