//! `redb`-backed [`SnapshotStore`] implementation.
//!
//! One table maps `product_name` to the encoded snapshot envelope. Each save
//! is a single write transaction, so a crash leaves either the previous or
//! the new document, never a mix.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use topom_core::{decode_snapshot, encode_snapshot, Snapshot};
use tracing::debug;

use crate::storage::snapshot_store::SnapshotStore;

const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("topom_snapshots");

/// Durable snapshot store in an embedded `redb` database file.
#[derive(Clone)]
pub struct RedbSnapshotStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbSnapshotStore").finish_non_exhaustive()
    }
}

impl RedbSnapshotStore {
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or is not a `redb` database.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)
            .with_context(|| format!("open snapshot database {}", path.display()))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn read_blocking(db: &Database, product_name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let txn = db.begin_read()?;
        let table = match txn.open_table(SNAPSHOTS) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(table.get(product_name)?.map(|v| v.value().to_vec()))
    }

    fn write_blocking(db: &Database, product_name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let txn = db.begin_write()?;
        {
            let mut table = txn.open_table(SNAPSHOTS)?;
            table.insert(product_name, bytes)?;
        }
        txn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for RedbSnapshotStore {
    async fn load(&self, product_name: &str) -> anyhow::Result<Option<Snapshot>> {
        let db = Arc::clone(&self.db);
        let name = product_name.to_string();
        let bytes = tokio::task::spawn_blocking(move || Self::read_blocking(&db, &name))
            .await
            .context("snapshot read task")??;
        bytes.map(|b| decode_snapshot(&b)).transpose()
    }

    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let bytes = encode_snapshot(snapshot)?;
        let db = Arc::clone(&self.db);
        let name = snapshot.product_name.clone();
        let version = snapshot.version;
        let len = bytes.len();
        tokio::task::spawn_blocking(move || Self::write_blocking(&db, &name, &bytes))
            .await
            .context("snapshot write task")??;
        debug!(version, bytes = len, "snapshot persisted");
        Ok(())
    }
}
