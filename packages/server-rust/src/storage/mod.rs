//! Snapshot persistence for the `Topom` server.
//!
//! - [`SnapshotStore`]: async persistence contract used by the topology store
//! - [`datastores`]: concrete backends (in-memory, and `redb` behind the
//!   default `redb` feature)

pub mod datastores;
pub mod snapshot_store;

pub use datastores::MemorySnapshotStore;
#[cfg(feature = "redb")]
pub use datastores::RedbSnapshotStore;
pub use snapshot_store::SnapshotStore;
