//! In-memory [`SnapshotStore`] implementation.
//!
//! [`MemorySnapshotStore`] keeps the encoded form of each snapshot, so
//! every save and load goes through the persisted codec. Nothing survives
//! the process; used by tests and by `--data-dir`-less runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use topom_core::{decode_snapshot, encode_snapshot, Snapshot};

use crate::storage::snapshot_store::SnapshotStore;

/// Non-durable snapshot store backed by a map of encoded documents.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    documents: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clusters with a persisted snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, product_name: &str) -> anyhow::Result<Option<Snapshot>> {
        let bytes = self.documents.lock().get(product_name).cloned();
        bytes.map(|b| decode_snapshot(&b)).transpose()
    }

    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let bytes = encode_snapshot(snapshot)?;
        self.documents
            .lock()
            .insert(snapshot.product_name.clone(), bytes);
        Ok(())
    }
}
