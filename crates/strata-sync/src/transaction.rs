//! # Transaction Handle
//!
//! A transaction-scoped view of one adapter's store. It offers the same
//! record operations as an adapter or the manager, so code written against
//! [`RecordOps`] runs unchanged inside or outside a transaction.
//!
//! ```text
//! adapter.transaction(|tx| Box::pin(async move {
//!     tx.create("user", ...).await?;      ─┐
//!     tx.update("user", ...).await?;       ├─ one StoreSession
//!     Ok(())                              ─┘
//! }))
//!   Ok  ──► commit    (all writes visible)
//!   Err ──► rollback  (no write visible)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strata_core::{fields, timestamp, AdapterKind, Fields, Mutation, Query, Record, SyncStatus};
use strata_db::{RecordRepository, RecordStore, StoreSession};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::adapter::RecordOps;
use crate::error::{StorageError, StorageResult};

// =============================================================================
// Write Stamps
// =============================================================================

/// Bookkeeping fields an adapter adds to every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStamp {
    /// Local writes: `syncStatus = pending` until pushed.
    PendingSync,

    /// Cloud writes: `cloudSyncedAt` set to the write time.
    CloudSynced,

    /// Sync bookkeeping writes: stored exactly as given.
    Unstamped,
}

impl WriteStamp {
    /// Stamps a new record: creation and update times plus the marker.
    pub fn on_create(&self, mut data: Fields, now: DateTime<Utc>) -> Fields {
        if *self == WriteStamp::Unstamped {
            return data;
        }
        data.insert(fields::CREATED_AT.into(), timestamp(now));
        data.insert(fields::UPDATED_AT.into(), timestamp(now));
        self.mark(&mut data, now);
        data
    }

    /// Stamps a patch: update time plus the marker.
    pub fn on_update(&self, mut data: Fields, now: DateTime<Utc>) -> Fields {
        if *self == WriteStamp::Unstamped {
            return data;
        }
        data.insert(fields::UPDATED_AT.into(), timestamp(now));
        self.mark(&mut data, now);
        data
    }

    fn mark(&self, data: &mut Fields, now: DateTime<Utc>) {
        match self {
            WriteStamp::PendingSync => {
                data.insert(fields::SYNC_STATUS.into(), SyncStatus::Pending.into());
            }
            WriteStamp::CloudSynced => {
                data.insert(fields::CLOUD_SYNCED_AT.into(), timestamp(now));
            }
            WriteStamp::Unstamped => {}
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// An open transaction on one adapter's store.
///
/// Dropping a transaction that was never committed rolls it back.
pub struct Transaction {
    kind: AdapterKind,
    store: Arc<dyn RecordStore>,
    stamp: WriteStamp,
    session: Mutex<Option<Box<dyn StoreSession>>>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("adapter", &self.kind)
            .field("stamp", &self.stamp)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    /// Opens a transaction on `store`.
    pub(crate) async fn begin(
        kind: AdapterKind,
        store: Arc<dyn RecordStore>,
        stamp: WriteStamp,
    ) -> StorageResult<Self> {
        let session = store.begin().await?;
        Ok(Transaction {
            kind,
            store,
            stamp,
            session: Mutex::new(Some(session)),
        })
    }

    /// The adapter this transaction belongs to.
    pub fn adapter(&self) -> AdapterKind {
        self.kind
    }

    /// Makes every write visible.
    pub async fn commit(&self) -> StorageResult<()> {
        let session = self.session.lock().await.take().ok_or_else(finished)?;
        session.commit().await?;
        debug!(adapter = %self.kind, "Transaction committed");
        Ok(())
    }

    /// Discards every write. Rolling back a finished transaction is a no-op.
    pub async fn rollback(&self) -> StorageResult<()> {
        if let Some(session) = self.session.lock().await.take() {
            session.rollback().await?;
            debug!(adapter = %self.kind, "Transaction rolled back");
        }
        Ok(())
    }

    /// Rolls back, logging instead of returning a failure.
    pub(crate) async fn abandon(&self) {
        if let Err(e) = self.rollback().await {
            warn!(adapter = %self.kind, error = %e, "Rollback failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.session
            .try_lock()
            .map(|s| s.is_none())
            .unwrap_or(false)
    }

    /// Writes a full record as given, inserting or replacing it by id.
    pub(crate) async fn upsert(&self, model: &str, record: &Record) -> StorageResult<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(finished)?;
        RecordRepository::new(&mut **session, self.store.models())
            .upsert(model, record)
            .await?;
        Ok(())
    }
}

fn finished() -> StorageError {
    StorageError::TransactionFailed("transaction already finished".into())
}

#[async_trait]
impl RecordOps for Transaction {
    async fn create(&self, model: &str, data: Fields) -> StorageResult<Record> {
        let data = self.stamp.on_create(data, Utc::now());
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(finished)?;
        let record = RecordRepository::new(&mut **session, self.store.models())
            .create(model, data)
            .await?;
        Ok(record)
    }

    async fn find_many(&self, model: &str, query: &Query) -> StorageResult<Vec<Record>> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(finished)?;
        let records = RecordRepository::new(&mut **session, self.store.models())
            .find_many(model, query)
            .await?;
        Ok(records)
    }

    async fn find_unique(&self, model: &str, query: &Query) -> StorageResult<Option<Record>> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(finished)?;
        let record = RecordRepository::new(&mut **session, self.store.models())
            .find_unique(model, query)
            .await?;
        Ok(record)
    }

    async fn update(&self, model: &str, mutation: &Mutation) -> StorageResult<Record> {
        let stamped = Mutation::new(
            mutation.query.clone(),
            self.stamp.on_update(mutation.data.clone(), Utc::now()),
        );
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(finished)?;
        let record = RecordRepository::new(&mut **session, self.store.models())
            .update(model, &stamped)
            .await?;
        Ok(record)
    }

    async fn delete(&self, model: &str, query: &Query) -> StorageResult<Record> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(finished)?;
        let record = RecordRepository::new(&mut **session, self.store.models())
            .delete(model, query)
            .await?;
        Ok(record)
    }

    async fn create_many(&self, model: &str, batch: Vec<Fields>) -> StorageResult<u64> {
        let now = Utc::now();
        let batch = batch
            .into_iter()
            .map(|data| self.stamp.on_create(data, now))
            .collect();
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(finished)?;
        let count = RecordRepository::new(&mut **session, self.store.models())
            .create_many(model, batch)
            .await?;
        Ok(count)
    }

    async fn update_many(&self, model: &str, mutation: &Mutation) -> StorageResult<u64> {
        let stamped = Mutation::new(
            mutation.query.clone(),
            self.stamp.on_update(mutation.data.clone(), Utc::now()),
        );
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(finished)?;
        let count = RecordRepository::new(&mut **session, self.store.models())
            .update_many(model, &stamped)
            .await?;
        Ok(count)
    }

    async fn delete_many(&self, model: &str, query: &Query) -> StorageResult<u64> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(finished)?;
        let count = RecordRepository::new(&mut **session, self.store.models())
            .delete_many(model, query)
            .await?;
        Ok(count)
    }
}
