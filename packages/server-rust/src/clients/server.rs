//! Storage servers over RESP.

use std::collections::BTreeMap;

use anyhow::Context as _;
use async_trait::async_trait;

use super::resp::RespConnection;
use crate::cluster::ServerClient;

/// Milliseconds one `SLOTSMGRTTAGSLOT` batch may take on the source server.
const MIGRATE_TIMEOUT_MS: u64 = 30_000;

/// Opens a fresh connection per call; control-plane traffic is rare.
#[derive(Debug, Clone, Default)]
pub struct RedisServerClient {
    auth: String,
}

impl RedisServerClient {
    #[must_use]
    pub fn new(auth: impl Into<String>) -> Self {
        Self { auth: auth.into() }
    }

    async fn connect(&self, addr: &str) -> anyhow::Result<RespConnection> {
        RespConnection::connect(addr, &self.auth).await
    }
}

/// Parses an INFO reply into `field -> value`, skipping section headers.
#[must_use]
pub fn parse_info(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Splits `host:port`, keeping IPv6 brackets on the host.
pub(crate) fn split_addr(addr: &str) -> anyhow::Result<(&str, &str)> {
    addr.rsplit_once(':')
        .filter(|(host, port)| !host.is_empty() && !port.is_empty())
        .with_context(|| format!("invalid address {addr}"))
}

#[async_trait]
impl ServerClient for RedisServerClient {
    async fn info(&self, addr: &str) -> anyhow::Result<BTreeMap<String, String>> {
        let mut conn = self.connect(addr).await?;
        let reply = conn.command(&["INFO"]).await?;
        Ok(parse_info(&reply.as_text()?))
    }

    async fn set_master(&self, addr: &str, master: Option<&str>) -> anyhow::Result<()> {
        let mut conn = self.connect(addr).await?;
        match master {
            None => {
                conn.command(&["SLAVEOF", "NO", "ONE"]).await?;
            }
            Some(master) => {
                let (host, port) = split_addr(master)?;
                if !self.auth.is_empty() {
                    conn.command(&["CONFIG", "SET", "masterauth", self.auth.as_str()])
                        .await?;
                }
                conn.command(&["SLAVEOF", host, port]).await?;
            }
        }
        Ok(())
    }

    async fn migrate_slot(&self, from: &str, to: &str, slot: u32) -> anyhow::Result<u64> {
        let (host, port) = split_addr(to)?;
        let mut conn = self.connect(from).await?;
        let timeout = MIGRATE_TIMEOUT_MS.to_string();
        let slot = slot.to_string();
        let reply = conn
            .command(&["SLOTSMGRTTAGSLOT", host, port, timeout.as_str(), slot.as_str()])
            .await?;
        // [moved, remaining]
        let items = reply.into_array()?;
        let remaining = items
            .get(1)
            .context("short SLOTSMGRTTAGSLOT reply")?
            .as_integer()?;
        Ok(u64::try_from(remaining).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_info_skips_headers_and_blank_lines() {
        let info = parse_info(
            "# Server\r\nrun_id:abc\r\n\r\n# Replication\r\nrole:slave\r\nmaster_host:10.0.0.1\r\nmaster_port:6379\r\n",
        );
        assert_eq!(info.get("run_id").map(String::as_str), Some("abc"));
        assert_eq!(info.get("master_port").map(String::as_str), Some("6379"));
        assert_eq!(info.len(), 4);
    }

    #[test]
    fn parse_info_keeps_colons_in_values() {
        let info = parse_info("db0:keys=3,expires=0,avg_ttl=0\nexecutable:/usr/bin/x:y\n");
        assert_eq!(
            info.get("executable").map(String::as_str),
            Some("/usr/bin/x:y")
        );
    }

    #[test]
    fn split_addr_uses_last_colon() {
        assert_eq!(split_addr("10.0.0.1:6379").unwrap(), ("10.0.0.1", "6379"));
        assert_eq!(split_addr("[::1]:6379").unwrap(), ("[::1]", "6379"));
        assert!(split_addr("nohost").is_err());
        assert!(split_addr(":6379").is_err());
    }
}
