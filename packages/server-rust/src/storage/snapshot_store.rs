//! Durable persistence backend for topology snapshots.
//!
//! [`SnapshotStore`] is the write-then-ack boundary of the topology store:
//! a commit is only published after `save()` returned `Ok`.

use async_trait::async_trait;
use topom_core::Snapshot;

/// Persistence backend holding the latest snapshot of each cluster.
///
/// Snapshots are keyed by `product_name`, so one backend can serve several
/// clusters. Used as `Arc<dyn SnapshotStore>`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Loads the latest persisted snapshot of `product_name`.
    ///
    /// Returns `None` if nothing was persisted yet.
    async fn load(&self, product_name: &str) -> anyhow::Result<Option<Snapshot>>;

    /// Durably replaces the persisted snapshot of `snapshot.product_name`.
    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()>;
}
