//! Proxy model.

use serde::{Deserialize, Serialize};

/// A request-routing front end registered with the cluster.
///
/// Identity is the `token`; `id` is a small display number assigned as
/// `max(existing) + 1` when the proxy is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub id: u32,
    pub token: String,
    /// Control-plane address used for fill-slots, start and shutdown calls.
    pub admin_addr: String,
    /// Data-plane address clients connect to.
    #[serde(default)]
    pub proxy_addr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datacenter: String,
    #[serde(default)]
    pub start_time: String,
}

/// Self-description a proxy returns from its admin API before registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyModel {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub proxy_addr: String,
    #[serde(default)]
    pub admin_addr: String,
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub start_time: String,
}
