//! Concrete [`SnapshotStore`](super::SnapshotStore) backends.

pub mod memory;
#[cfg(feature = "redb")]
pub mod redb_store;

pub use memory::MemorySnapshotStore;
#[cfg(feature = "redb")]
pub use redb_store::RedbSnapshotStore;
