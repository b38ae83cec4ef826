//! In-memory collaborators shared by the unit tests.
//!
//! Each fake records what the orchestrator asked of it and can be told to
//! fail or stall per address, so tests can drive partial failures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use topom_core::{Proxy, ProxyModel, ProxyStats, SentinelModel, SentinelReport, Slot, Snapshot};

use crate::cluster::traits::{Clients, ProxyClient, SentinelClient, ServerClient};
use crate::cluster::types::{ClusterConfig, MonitorConfig};
use crate::cluster::Topom;
use crate::storage::{MemorySnapshotStore, SnapshotStore};

/// Keys moved by one fake migration batch.
const MIGRATE_BATCH: u64 = 2;

// ---------------------------------------------------------------------------
// Failure injection
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Faults {
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
}

impl Faults {
    /// Delay configured for `addr` and whether it currently fails.
    fn lookup(&self, addr: &str) -> (Option<Duration>, bool) {
        (self.delays.get(addr).copied(), self.failing.contains(addr))
    }
}

async fn gate(faults: &Mutex<Faults>, addr: &str) -> anyhow::Result<()> {
    let (delay, failing) = faults.lock().lookup(addr);
    if let Some(d) = delay {
        tokio::time::sleep(d).await;
    }
    if failing {
        anyhow::bail!("connection refused");
    }
    Ok(())
}

fn split_addr(addr: &str) -> (&str, &str) {
    addr.rsplit_once(':').unwrap_or((addr, ""))
}

// ---------------------------------------------------------------------------
// FakeServerClient
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeServerClient {
    faults: Mutex<Faults>,
    masters: Mutex<HashMap<String, Option<String>>>,
    /// Keys left per slot, shared by every source server.
    keys: Mutex<HashMap<u32, u64>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeServerClient {
    pub fn fail(&self, addr: &str) {
        self.faults.lock().failing.insert(addr.to_string());
    }

    pub fn heal(&self, addr: &str) {
        let mut faults = self.faults.lock();
        faults.failing.remove(addr);
        faults.delays.remove(addr);
    }

    pub fn delay(&self, addr: &str, delay: Duration) {
        self.faults.lock().delays.insert(addr.to_string(), delay);
    }

    /// Replication target last set on `addr`; `None` if never set.
    pub fn master_of(&self, addr: &str) -> Option<Option<String>> {
        self.masters.lock().get(addr).cloned()
    }

    pub fn set_master_of(&self, addr: &str, master: Option<&str>) {
        self.masters
            .lock()
            .insert(addr.to_string(), master.map(str::to_string));
    }

    pub fn set_keys(&self, slot: u32, keys: u64) {
        self.keys.lock().insert(slot, keys);
    }

    /// Highest number of migration batches observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerClient for FakeServerClient {
    async fn info(&self, addr: &str) -> anyhow::Result<BTreeMap<String, String>> {
        gate(&self.faults, addr).await?;
        let mut info = BTreeMap::from([("run_id".to_string(), format!("run-{addr}"))]);
        match self.master_of(addr).flatten() {
            Some(master) => {
                let (host, port) = split_addr(&master);
                info.insert("role".into(), "slave".into());
                info.insert("master_host".into(), host.into());
                info.insert("master_port".into(), port.into());
                info.insert("master_link_status".into(), "up".into());
            }
            None => {
                info.insert("role".into(), "master".into());
            }
        }
        Ok(info)
    }

    async fn set_master(&self, addr: &str, master: Option<&str>) -> anyhow::Result<()> {
        gate(&self.faults, addr).await?;
        self.set_master_of(addr, master);
        Ok(())
    }

    async fn migrate_slot(&self, from: &str, to: &str, slot: u32) -> anyhow::Result<u64> {
        gate(&self.faults, from).await?;
        gate(&self.faults, to).await?;

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let remain = {
            let mut keys = self.keys.lock();
            let left = keys.entry(slot).or_insert(0);
            *left = left.saturating_sub(MIGRATE_BATCH);
            *left
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(remain)
    }
}

// ---------------------------------------------------------------------------
// FakeProxyClient
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ProxyRecord {
    started: bool,
    slots: BTreeMap<u32, Slot>,
    /// Slots that were ever pushed with `locked` set.
    locked_seen: HashSet<u32>,
    sentinel_pushes: usize,
}

/// Proxies keyed by admin address.
#[derive(Debug, Default)]
pub struct FakeProxyClient {
    faults: Mutex<Faults>,
    records: Mutex<HashMap<String, ProxyRecord>>,
}

impl FakeProxyClient {
    pub fn fail(&self, admin_addr: &str) {
        self.faults.lock().failing.insert(admin_addr.to_string());
    }

    pub fn heal(&self, admin_addr: &str) {
        self.faults.lock().failing.remove(admin_addr);
    }

    pub fn is_started(&self, admin_addr: &str) -> bool {
        self.records
            .lock()
            .get(admin_addr)
            .is_some_and(|r| r.started)
    }

    /// Routing entry the proxy currently holds for `sid`.
    pub fn slot(&self, admin_addr: &str, sid: u32) -> Option<Slot> {
        self.records
            .lock()
            .get(admin_addr)
            .and_then(|r| r.slots.get(&sid).cloned())
    }

    pub fn slot_count(&self, admin_addr: &str) -> usize {
        self.records
            .lock()
            .get(admin_addr)
            .map_or(0, |r| r.slots.len())
    }

    pub fn saw_locked(&self, admin_addr: &str, sid: u32) -> bool {
        self.records
            .lock()
            .get(admin_addr)
            .is_some_and(|r| r.locked_seen.contains(&sid))
    }

    pub fn sentinel_pushes(&self, admin_addr: &str) -> usize {
        self.records
            .lock()
            .get(admin_addr)
            .map_or(0, |r| r.sentinel_pushes)
    }

    fn with_record(&self, admin_addr: &str, f: impl FnOnce(&mut ProxyRecord)) {
        f(self
            .records
            .lock()
            .entry(admin_addr.to_string())
            .or_default());
    }
}

#[async_trait]
impl ProxyClient for FakeProxyClient {
    async fn model(&self, admin_addr: &str) -> anyhow::Result<ProxyModel> {
        gate(&self.faults, admin_addr).await?;
        let (host, _) = split_addr(admin_addr);
        Ok(ProxyModel {
            token: format!("token-{admin_addr}"),
            proxy_addr: format!("{host}:19000"),
            admin_addr: admin_addr.to_string(),
            datacenter: String::new(),
            start_time: "2026-01-01 00:00:00".to_string(),
        })
    }

    async fn xping(&self, proxy: &Proxy) -> anyhow::Result<()> {
        gate(&self.faults, &proxy.admin_addr).await
    }

    async fn fill_slots(&self, proxy: &Proxy, slots: &[Slot]) -> anyhow::Result<()> {
        gate(&self.faults, &proxy.admin_addr).await?;
        self.with_record(&proxy.admin_addr, |r| {
            for slot in slots {
                if slot.locked {
                    r.locked_seen.insert(slot.id);
                }
                r.slots.insert(slot.id, slot.clone());
            }
        });
        Ok(())
    }

    async fn start(&self, proxy: &Proxy) -> anyhow::Result<()> {
        gate(&self.faults, &proxy.admin_addr).await?;
        self.with_record(&proxy.admin_addr, |r| r.started = true);
        Ok(())
    }

    async fn shutdown(&self, proxy: &Proxy) -> anyhow::Result<()> {
        gate(&self.faults, &proxy.admin_addr).await?;
        self.with_record(&proxy.admin_addr, |r| r.started = false);
        Ok(())
    }

    async fn set_sentinels(&self, proxy: &Proxy, _sentinel: &SentinelModel) -> anyhow::Result<()> {
        gate(&self.faults, &proxy.admin_addr).await?;
        self.with_record(&proxy.admin_addr, |r| r.sentinel_pushes += 1);
        Ok(())
    }

    async fn stats(&self, proxy: &Proxy) -> anyhow::Result<ProxyStats> {
        gate(&self.faults, &proxy.admin_addr).await?;
        Ok(ProxyStats {
            online: self.is_started(&proxy.admin_addr),
            ..ProxyStats::default()
        })
    }
}

// ---------------------------------------------------------------------------
// FakeSentinelClient
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeSentinelClient {
    faults: Mutex<Faults>,
    reports: Mutex<HashMap<String, SentinelReport>>,
    flushed: Mutex<HashSet<String>>,
    monitored: Mutex<HashMap<String, BTreeMap<u32, String>>>,
}

impl FakeSentinelClient {
    pub fn fail(&self, addr: &str) {
        self.faults.lock().failing.insert(addr.to_string());
    }

    pub fn set_report(&self, addr: &str, report: SentinelReport) {
        self.reports.lock().insert(addr.to_string(), report);
    }

    pub fn was_flushed(&self, addr: &str) -> bool {
        self.flushed.lock().contains(addr)
    }

    /// Masters the sentinel was last told to monitor.
    pub fn monitored(&self, addr: &str) -> Option<BTreeMap<u32, String>> {
        self.monitored.lock().get(addr).cloned()
    }
}

#[async_trait]
impl SentinelClient for FakeSentinelClient {
    async fn flush_config(&self, addr: &str) -> anyhow::Result<()> {
        gate(&self.faults, addr).await?;
        self.flushed.lock().insert(addr.to_string());
        Ok(())
    }

    async fn remove_groups(&self, addr: &str) -> anyhow::Result<()> {
        gate(&self.faults, addr).await?;
        self.monitored.lock().remove(addr);
        Ok(())
    }

    async fn monitor_groups(
        &self,
        addr: &str,
        masters: &BTreeMap<u32, String>,
        _config: &MonitorConfig,
    ) -> anyhow::Result<()> {
        gate(&self.faults, addr).await?;
        self.monitored
            .lock()
            .insert(addr.to_string(), masters.clone());
        Ok(())
    }

    async fn report(&self, addr: &str) -> anyhow::Result<SentinelReport> {
        gate(&self.faults, addr).await?;
        Ok(self.reports.lock().get(addr).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// FlakySnapshotStore
// ---------------------------------------------------------------------------

/// Memory backend whose writes can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakySnapshotStore {
    inner: MemorySnapshotStore,
    failing: AtomicBool,
}

impl FlakySnapshotStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SnapshotStore for FlakySnapshotStore {
    async fn load(&self, product_name: &str) -> anyhow::Result<Option<Snapshot>> {
        self.inner.load(product_name).await
    }

    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.save(snapshot).await
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Fakes {
    pub server: Arc<FakeServerClient>,
    pub proxy: Arc<FakeProxyClient>,
    pub sentinel: Arc<FakeSentinelClient>,
}

impl Fakes {
    pub fn clients(&self) -> Clients {
        Clients {
            server: self.server.clone(),
            proxy: self.proxy.clone(),
            sentinel: self.sentinel.clone(),
        }
    }
}

pub fn test_config(slot_count: u32) -> ClusterConfig {
    ClusterConfig {
        product_name: "demo".to_string(),
        product_auth: "secret".to_string(),
        slot_count,
        ..ClusterConfig::default()
    }
}

/// A fresh orchestrator over `slot_count` unassigned slots and in-memory fakes.
pub async fn test_topom(slot_count: u32) -> (Arc<Topom>, Fakes) {
    let fakes = Fakes::default();
    let topom = Topom::open(
        test_config(slot_count),
        Arc::new(MemorySnapshotStore::new()),
        fakes.clients(),
    )
    .await
    .unwrap();
    (Arc::new(topom), fakes)
}

/// Assigns `sids` to `gid` directly, bypassing migration.
pub async fn assign_slots(topom: &Topom, gid: u32, sids: &[u32]) {
    topom
        .store()
        .commit(None, |s| {
            for sid in sids {
                s.slot_mut(*sid).unwrap().group_id = gid;
            }
            Ok(())
        })
        .await
        .unwrap();
}
