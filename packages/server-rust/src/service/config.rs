use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterConfig;
use crate::network::NetworkConfig;

/// Process-level configuration of the `topom` server.
///
/// Loaded from an optional JSON file and overlaid with command-line flags.
/// Every field has a default, so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopomConfig {
    pub cluster: ClusterConfig,
    pub network: NetworkConfig,
    /// Directory of the `redb` snapshot file. `None` keeps snapshots in memory.
    pub data_dir: Option<PathBuf>,
    /// Prometheus exporter listen address. `None` disables the exporter.
    pub metrics_addr: Option<SocketAddr>,
    /// Default budget of one admin operation, including its external calls.
    pub default_operation_timeout_ms: u64,
    /// Admin operations running at once before new ones are shed.
    pub max_concurrent_operations: u32,
    /// Tick of the slot migration driver.
    pub slot_action_tick_ms: u64,
    /// Tick of the replication resync driver.
    pub sync_action_tick_ms: u64,
    /// Interval between two stats poll cycles.
    pub stats_interval_ms: u64,
}

impl Default for TopomConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            network: NetworkConfig::default(),
            data_dir: None,
            metrics_addr: None,
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 64,
            slot_action_tick_ms: 1_000,
            sync_action_tick_ms: 1_000,
            stats_interval_ms: 3_000,
        }
    }
}

impl TopomConfig {
    /// Parses a JSON config document; absent fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON for this shape.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.default_operation_timeout_ms)
    }
}
