//! Topology store: lock-free snapshot reads, serialized durable commits.
//!
//! - Reads go through `ArcSwap<Snapshot>` and never wait for writers.
//! - Writers take one cluster-wide async mutex, check the caller's expected
//!   version, apply a mutator to a private clone, validate it, persist it and
//!   only then publish it. A failed step leaves the published snapshot as is.
//! - A [`Transaction`] keeps the mutex across several commits so multi-step
//!   flows (promotion, reinit) cannot interleave with other mutations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, MutexGuard};
use topom_core::Snapshot;
use tracing::{debug, info, warn};

use super::error::{TopomError, TopomResult};
use crate::storage::SnapshotStore;

// ---------------------------------------------------------------------------
// TopologyStore
// ---------------------------------------------------------------------------

/// Authoritative, versioned topology of one cluster.
pub struct TopologyStore {
    current: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
    persistence: Arc<dyn SnapshotStore>,
    closed: AtomicBool,
}

impl std::fmt::Debug for TopologyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.load();
        f.debug_struct("TopologyStore")
            .field("product_name", &current.product_name)
            .field("version", &current.version)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl TopologyStore {
    /// Restores the latest persisted snapshot of `product_name`, or creates
    /// and persists a fresh one with `slot_count` unassigned slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or the initial snapshot
    /// cannot be written.
    pub async fn open(
        persistence: Arc<dyn SnapshotStore>,
        product_name: &str,
        slot_count: u32,
    ) -> anyhow::Result<Self> {
        let snapshot = if let Some(s) = persistence.load(product_name).await? {
            if s.slot_count() != slot_count {
                warn!(
                    persisted = s.slot_count(),
                    configured = slot_count,
                    "slot count differs from configuration, keeping persisted table"
                );
            }
            info!(product = product_name, version = s.version, "restored topology snapshot");
            s
        } else {
            let s = Snapshot::new(product_name, slot_count);
            s.validate()?;
            persistence.save(&s).await?;
            info!(product = product_name, slots = slot_count, "initialized new topology");
            s
        };
        Ok(Self::from_snapshot(persistence, snapshot))
    }

    /// Wraps an already validated snapshot without touching the backend.
    #[must_use]
    pub fn from_snapshot(persistence: Arc<dyn SnapshotStore>, snapshot: Snapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            write_lock: Mutex::new(()),
            persistence,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the last committed snapshot. Never blocks, never torn.
    #[must_use]
    pub fn read(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Rejects every later mutation with [`TopomError::Closed`]. Reads keep working.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Acquires the mutation lock and checks `expected` against the current version.
    ///
    /// # Errors
    ///
    /// [`TopomError::Closed`] after [`close`](Self::close);
    /// [`TopomError::Conflict`] if `expected` is stale.
    pub async fn begin(&self, expected: Option<u64>) -> TopomResult<Transaction<'_>> {
        if self.is_closed() {
            return Err(TopomError::Closed);
        }
        let guard = self.write_lock.lock().await;
        if self.is_closed() {
            return Err(TopomError::Closed);
        }
        if let Some(expected) = expected {
            let current = self.version();
            if expected != current {
                return Err(TopomError::Conflict { expected, current });
            }
        }
        Ok(Transaction {
            store: self,
            _guard: guard,
        })
    }

    /// Single-step mutation: `begin(expected)` followed by one commit.
    ///
    /// # Errors
    ///
    /// Any error of [`begin`](Self::begin) or [`Transaction::commit`].
    pub async fn commit<T, F>(&self, expected: Option<u64>, mutator: F) -> TopomResult<(Arc<Snapshot>, T)>
    where
        F: FnOnce(&mut Snapshot) -> TopomResult<T>,
    {
        let mut txn = self.begin(expected).await?;
        txn.commit(mutator).await
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Exclusive write access to the store until dropped.
pub struct Transaction<'a> {
    store: &'a TopologyStore,
    _guard: MutexGuard<'a, ()>,
}

impl Transaction<'_> {
    /// The latest committed snapshot. Stable while the transaction is held,
    /// except for this transaction's own commits.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.read()
    }

    /// Applies `mutator` to a copy of the latest snapshot, bumps the version,
    /// validates, persists and publishes it.
    ///
    /// # Errors
    ///
    /// The mutator's own error, [`TopomError::Invariant`] if the result breaks
    /// a structural invariant, or [`TopomError::Persistence`] if the backend
    /// write fails. In every error case the published snapshot is unchanged.
    pub async fn commit<T, F>(&mut self, mutator: F) -> TopomResult<(Arc<Snapshot>, T)>
    where
        F: FnOnce(&mut Snapshot) -> TopomResult<T>,
    {
        if self.store.is_closed() {
            return Err(TopomError::Closed);
        }
        let current = self.store.read();
        let mut next = Snapshot::clone(&current);
        let out = mutator(&mut next)?;
        next.version = current.version + 1;
        next.validate().map_err(TopomError::Invariant)?;

        if let Err(e) = self.store.persistence.save(&next).await {
            warn!(version = next.version, error = %e, "snapshot persistence failed, rolled back");
            return Err(TopomError::Persistence(e));
        }

        let next = Arc::new(next);
        self.store.current.store(Arc::clone(&next));
        debug!(version = next.version, "topology committed");
        Ok((next, out))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
