//! Network implementations of the collaborator traits.
//!
//! Storage servers and sentinels speak RESP (`server`, `sentinel` over the
//! `resp` codec); proxies expose an HTTP admin API (`proxy`).

pub mod proxy;
pub mod resp;
pub mod sentinel;
pub mod server;

use std::sync::Arc;

pub use proxy::{proxy_xauth, HttpProxyClient};
pub use sentinel::RedisSentinelClient;
pub use server::{parse_info, RedisServerClient};

use crate::cluster::{Clients, ClusterConfig};

/// Wires the production clients for `config`.
///
/// # Errors
///
/// Returns an error if the proxy HTTP client cannot be built.
pub fn network_clients(config: &ClusterConfig) -> anyhow::Result<Clients> {
    Ok(Clients {
        server: Arc::new(RedisServerClient::new(config.product_auth.clone())),
        proxy: Arc::new(HttpProxyClient::new(
            config.product_name.clone(),
            config.product_auth.clone(),
            config.external_timeout(),
        )?),
        sentinel: Arc::new(RedisSentinelClient::new(
            config.product_name.clone(),
            config.product_auth.clone(),
        )),
    })
}
