//! Cluster orchestration module.
//!
//! Holds the versioned topology store, the `Topom` facade and its
//! operations (slot actions, groups, proxies, sentinels), the stats cache,
//! and the collaborator traits for managed servers, proxies and sentinels.

pub mod assignment;
pub mod context;
pub mod error;
mod groups;
mod proxies;
pub mod sentinel;
mod slots;
pub mod state;
pub mod stats;
pub mod topom;
pub mod traits;
pub mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::{TopomError, TopomResult};
pub use slots::RebalancePlan;
pub use state::{TopologyStore, Transaction};
pub use stats::StatsCache;
pub use topom::{derive_xauth, Topom};
pub use traits::{Clients, ProxyClient, SentinelClient, ServerClient};
pub use types::{ActionProgress, ClusterConfig, MonitorConfig};

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
