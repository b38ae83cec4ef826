//! Sentinels over RESP.
//!
//! Groups are monitored under the name `{product_name}-{gid}`; masters with
//! other names belong to other clusters and are never touched.

use std::collections::BTreeMap;

use anyhow::Context as _;
use async_trait::async_trait;
use topom_core::{MonitoredMaster, SentinelGroupView, SentinelNode, SentinelReport};
use tracing::debug;

use super::resp::{Frame, RespConnection};
use super::server::split_addr;
use crate::cluster::{MonitorConfig, SentinelClient};

#[derive(Debug, Clone)]
pub struct RedisSentinelClient {
    product_name: String,
    /// Password sentinels use to reach the monitored servers.
    server_auth: String,
}

impl RedisSentinelClient {
    #[must_use]
    pub fn new(product_name: impl Into<String>, server_auth: impl Into<String>) -> Self {
        Self {
            product_name: product_name.into(),
            server_auth: server_auth.into(),
        }
    }

    fn master_name(&self, gid: u32) -> String {
        format!("{}-{gid}", self.product_name)
    }

    /// Group id of a master name of this product.
    fn group_of(&self, name: &str) -> Option<u32> {
        name.strip_prefix(&self.product_name)?
            .strip_prefix('-')?
            .parse()
            .ok()
    }

    async fn connect(addr: &str) -> anyhow::Result<RespConnection> {
        RespConnection::connect(addr, "").await
    }

    /// Names of the masters of this product the sentinel monitors.
    async fn own_masters(&self, conn: &mut RespConnection) -> anyhow::Result<Vec<(u32, BTreeMap<String, String>)>> {
        let rows = conn.command(&["SENTINEL", "MASTERS"]).await?.into_array()?;
        let mut masters = Vec::new();
        for row in rows {
            let fields = fields(row)?;
            if let Some(gid) = fields.get("name").and_then(|n| self.group_of(n)) {
                masters.push((gid, fields));
            }
        }
        Ok(masters)
    }
}

/// Flattened `[k1, v1, k2, v2, ...]` row as a map.
fn fields(row: Frame) -> anyhow::Result<BTreeMap<String, String>> {
    let items = row.into_array()?;
    let mut map = BTreeMap::new();
    for pair in items.chunks(2) {
        if let [k, v] = pair {
            map.insert(k.as_text()?, v.as_text()?);
        }
    }
    Ok(map)
}

fn node_of(fields: &BTreeMap<String, String>) -> anyhow::Result<SentinelNode> {
    let ip = fields.get("ip").context("row without ip")?;
    let port = fields.get("port").context("row without port")?;
    Ok(SentinelNode {
        addr: format!("{ip}:{port}"),
        runid: fields.get("runid").cloned().unwrap_or_default(),
    })
}

fn count(fields: &BTreeMap<String, String>, key: &str) -> u32 {
    fields.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Whether the `flags` field marks the master as reachable.
fn flags_ok(flags: &str) -> bool {
    !flags
        .split(',')
        .any(|f| matches!(f, "s_down" | "o_down" | "disconnected"))
}

#[async_trait]
impl SentinelClient for RedisSentinelClient {
    async fn flush_config(&self, addr: &str) -> anyhow::Result<()> {
        let mut conn = Self::connect(addr).await?;
        conn.command(&["SENTINEL", "FLUSHCONFIG"]).await?;
        Ok(())
    }

    async fn remove_groups(&self, addr: &str) -> anyhow::Result<()> {
        let mut conn = Self::connect(addr).await?;
        for (gid, _) in self.own_masters(&mut conn).await? {
            conn.command(&["SENTINEL", "REMOVE", self.master_name(gid).as_str()])
                .await?;
        }
        conn.command(&["SENTINEL", "FLUSHCONFIG"]).await?;
        Ok(())
    }

    async fn monitor_groups(
        &self,
        addr: &str,
        masters: &BTreeMap<u32, String>,
        config: &MonitorConfig,
    ) -> anyhow::Result<()> {
        let mut conn = Self::connect(addr).await?;
        let quorum = config.quorum.to_string();
        let down_after = config.down_after_ms.to_string();
        let failover_timeout = config.failover_timeout_ms.to_string();
        let parallel_syncs = config.parallel_syncs.to_string();

        for (gid, master) in masters {
            let name = self.master_name(*gid);
            let (host, port) = split_addr(master)?;
            if let Err(e) = conn.command(&["SENTINEL", "REMOVE", name.as_str()]).await {
                debug!(sentinel = addr, master = %name, error = %e, "nothing to remove");
            }
            conn.command(&["SENTINEL", "MONITOR", name.as_str(), host, port, quorum.as_str()])
                .await?;

            let mut set = vec![
                "SENTINEL",
                "SET",
                name.as_str(),
                "down-after-milliseconds",
                down_after.as_str(),
                "failover-timeout",
                failover_timeout.as_str(),
                "parallel-syncs",
                parallel_syncs.as_str(),
            ];
            if !self.server_auth.is_empty() {
                set.extend(["auth-pass", self.server_auth.as_str()]);
            }
            if !config.notification_script.is_empty() {
                set.extend(["notification-script", config.notification_script.as_str()]);
            }
            if !config.client_reconfig_script.is_empty() {
                set.extend(["client-reconfig-script", config.client_reconfig_script.as_str()]);
            }
            conn.command(&set).await?;
        }
        conn.command(&["SENTINEL", "FLUSHCONFIG"]).await?;
        Ok(())
    }

    async fn report(&self, addr: &str) -> anyhow::Result<SentinelReport> {
        let mut conn = Self::connect(addr).await?;
        let mut report = SentinelReport::default();
        for (gid, master_fields) in self.own_masters(&mut conn).await? {
            let master = node_of(&master_fields)?;
            let name = self.master_name(gid);
            let rows = conn.command(&["SENTINEL", "SLAVES", name.as_str()]).await?.into_array()?;
            let slaves = rows
                .into_iter()
                .map(|row| fields(row).and_then(|f| node_of(&f)))
                .collect::<anyhow::Result<Vec<_>>>()?;

            report.masters.insert(
                gid,
                MonitoredMaster {
                    addr: master.addr.clone(),
                    status_ok: flags_ok(master_fields.get("flags").map_or("", String::as_str)),
                    num_slaves: count(&master_fields, "num-slaves"),
                    num_other_sentinels: count(&master_fields, "num-other-sentinels"),
                },
            );
            report.groups.insert(gid, SentinelGroupView { master, slaves });
        }
        Ok(report)
    }
}
