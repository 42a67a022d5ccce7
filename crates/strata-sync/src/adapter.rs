//! # Storage Adapter Contract
//!
//! The capability surface every backend exposes, and the state shared by
//! the local and cloud implementations.
//!
//! ## Adapter Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        StorageAdapter                                   │
//! │                                                                         │
//! │  RecordOps (also implemented by Transaction and StorageManager)        │
//! │  ├── create / find_many / find_unique / update / delete                │
//! │  └── create_many / update_many / delete_many   → affected count        │
//! │                                                                         │
//! │  Lifecycle                                                             │
//! │  ├── connect / disconnect          idempotent                          │
//! │  ├── connection_status             non-blocking flag read              │
//! │  └── cleanup                       stop auto-sync, then disconnect     │
//! │                                                                         │
//! │  Sync                                                                  │
//! │  ├── sync                          never fails: errors in SyncResult   │
//! │  ├── last_sync_time / set_...      best-effort bookkeeping             │
//! │  └── start_auto_sync / stop_...    at most one timer per adapter       │
//! │                                                                         │
//! │  transaction(|tx| ...)             commit on Ok, rollback on Err       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Connection State
//! ```text
//! disconnected ──connect()──► (connecting) ──ok──► connected
//!      ▲                           │                   │
//!      │                           └──attempts spent───┤
//!      └────────────────disconnect() / network error───┘
//! ```
//! `connecting` is never observable: `connection_status()` reports false
//! until a connect succeeds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use strata_core::{AdapterKind, BestEffort, Fields, Mutation, Query, Record, SyncResult};
use strata_db::RecordStore;
use tracing::{debug, warn};

use crate::cloud::CloudAdapter;
use crate::config::StorageOptions;
use crate::error::StorageResult;
use crate::local::LocalAdapter;
use crate::replica::Replica;
use crate::scheduler::Periodic;
use crate::transaction::{Transaction, WriteStamp};

// =============================================================================
// Traits
// =============================================================================

/// Record operations addressed by model name.
///
/// Unknown model names fail with `StorageError::ModelNotFound`.
#[async_trait]
pub trait RecordOps: Send + Sync {
    async fn create(&self, model: &str, data: Fields) -> StorageResult<Record>;

    async fn find_many(&self, model: &str, query: &Query) -> StorageResult<Vec<Record>>;

    async fn find_unique(&self, model: &str, query: &Query) -> StorageResult<Option<Record>>;

    /// Patches the first record matching `mutation.query`.
    async fn update(&self, model: &str, mutation: &Mutation) -> StorageResult<Record>;

    /// Deletes the first record matching `query` and returns it.
    async fn delete(&self, model: &str, query: &Query) -> StorageResult<Record>;

    async fn create_many(&self, model: &str, batch: Vec<Fields>) -> StorageResult<u64>;

    async fn update_many(&self, model: &str, mutation: &Mutation) -> StorageResult<u64>;

    async fn delete_many(&self, model: &str, query: &Query) -> StorageResult<u64>;
}

/// A record store adapter over one physical backend.
#[async_trait]
pub trait StorageAdapter: RecordOps + Clone + 'static {
    fn kind(&self) -> AdapterKind;

    fn options(&self) -> &StorageOptions;

    /// Connects. A no-op when already connected.
    async fn connect(&self) -> StorageResult<()>;

    /// Disconnects. A no-op when already disconnected.
    async fn disconnect(&self) -> StorageResult<()>;

    fn connection_status(&self) -> bool;

    /// Runs one sync pass. Failures are reported in the result.
    async fn sync(&self) -> SyncResult;

    async fn last_sync_time(&self) -> BestEffort<Option<DateTime<Utc>>>;

    async fn set_last_sync_time(&self, at: DateTime<Utc>) -> BestEffort<()>;

    /// Starts the recurring sync timer, replacing any running one.
    /// A no-op when sync is disabled.
    fn start_auto_sync(&self);

    fn stop_auto_sync(&self);

    /// Terminal teardown, safe to call in any state and more than once.
    async fn cleanup(&self) -> StorageResult<()> {
        self.stop_auto_sync();
        if self.connection_status() {
            self.disconnect().await?;
        }
        Ok(())
    }

    /// Runs `f` inside one transaction: committed when it returns `Ok`,
    /// rolled back otherwise.
    ///
    /// ```rust,ignore
    /// let user = adapter
    ///     .transaction(move |tx| Box::pin(async move {
    ///         let user = tx.create("user", fields).await?;
    ///         tx.create("chatSession", session_for(&user)).await?;
    ///         Ok(user)
    ///     }))
    ///     .await?;
    /// ```
    fn transaction<'a, T, F>(&'a self, f: F) -> BoxFuture<'a, StorageResult<T>>
    where
        F: for<'t> FnOnce(&'t Transaction) -> BoxFuture<'t, StorageResult<T>> + Send + 'a,
        T: Send + 'a;
}

// =============================================================================
// Shared Adapter State
// =============================================================================

/// State common to both adapters. Adapters are cheap clones over an `Arc`
/// of this.
#[derive(Debug)]
pub(crate) struct AdapterCore {
    pub(crate) kind: AdapterKind,
    pub(crate) options: StorageOptions,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) auto_sync: Periodic,
    connected: AtomicBool,
    replica: RwLock<Option<Replica>>,
}

impl AdapterCore {
    pub(crate) fn new(
        kind: AdapterKind,
        options: StorageOptions,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        AdapterCore {
            kind,
            options,
            store,
            auto_sync: Periodic::new(kind.as_str()),
            connected: AtomicBool::new(false),
            replica: RwLock::new(None),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) async fn begin(&self, stamp: WriteStamp) -> StorageResult<Transaction> {
        Transaction::begin(self.kind, self.store.clone(), stamp).await
    }

    /// Points sync passes at the other side's store.
    pub(crate) fn link_replica(&self, store: Arc<dyn RecordStore>) {
        debug!(adapter = %self.kind, "Replica linked");
        *self.replica.write() = Some(Replica::new(self.kind.other(), store));
    }

    pub(crate) fn replica(&self) -> Option<Replica> {
        self.replica.read().clone()
    }

    /// Store holding this adapter's last-sync rows. The cloud store is
    /// shared between devices, so a linked cloud adapter keeps its pull
    /// window in the local store it pulls into.
    fn bookkeeping(&self) -> Arc<dyn RecordStore> {
        match (self.kind, self.replica()) {
            (AdapterKind::Cloud, Some(replica)) => replica.store().clone(),
            _ => self.store.clone(),
        }
    }

    pub(crate) async fn last_sync_time(&self) -> BestEffort<Option<DateTime<Utc>>> {
        let store = self.bookkeeping();
        let outcome = BestEffort::from(store.last_sync_time(self.kind.as_str()).await);
        if let BestEffort::Failed(reason) = &outcome {
            warn!(adapter = %self.kind, error = %reason, "Failed to read last sync time");
        }
        outcome
    }

    pub(crate) async fn set_last_sync_time(&self, at: DateTime<Utc>) -> BestEffort<()> {
        let store = self.bookkeeping();
        let outcome = BestEffort::from(store.record_sync_time(self.kind.as_str(), at).await);
        if let BestEffort::Failed(reason) = &outcome {
            warn!(adapter = %self.kind, error = %reason, "Failed to record sync time");
        }
        outcome
    }
}

// =============================================================================
// Either Adapter
// =============================================================================

/// The adapter the manager resolved for a call.
#[derive(Debug, Clone)]
pub enum AnyAdapter {
    Local(LocalAdapter),
    Cloud(CloudAdapter),
}

impl AnyAdapter {
    pub fn kind(&self) -> AdapterKind {
        match self {
            AnyAdapter::Local(_) => AdapterKind::Local,
            AnyAdapter::Cloud(_) => AdapterKind::Cloud,
        }
    }

    pub fn connection_status(&self) -> bool {
        match self {
            AnyAdapter::Local(a) => a.connection_status(),
            AnyAdapter::Cloud(a) => a.connection_status(),
        }
    }

    pub fn transaction<'a, T, F>(&'a self, f: F) -> BoxFuture<'a, StorageResult<T>>
    where
        F: for<'t> FnOnce(&'t Transaction) -> BoxFuture<'t, StorageResult<T>> + Send + 'a,
        T: Send + 'a,
    {
        match self {
            AnyAdapter::Local(a) => a.transaction(f),
            AnyAdapter::Cloud(a) => a.transaction(f),
        }
    }

    fn ops(&self) -> &dyn RecordOps {
        match self {
            AnyAdapter::Local(a) => a,
            AnyAdapter::Cloud(a) => a,
        }
    }
}

#[async_trait]
impl RecordOps for AnyAdapter {
    async fn create(&self, model: &str, data: Fields) -> StorageResult<Record> {
        self.ops().create(model, data).await
    }

    async fn find_many(&self, model: &str, query: &Query) -> StorageResult<Vec<Record>> {
        self.ops().find_many(model, query).await
    }

    async fn find_unique(&self, model: &str, query: &Query) -> StorageResult<Option<Record>> {
        self.ops().find_unique(model, query).await
    }

    async fn update(&self, model: &str, mutation: &Mutation) -> StorageResult<Record> {
        self.ops().update(model, mutation).await
    }

    async fn delete(&self, model: &str, query: &Query) -> StorageResult<Record> {
        self.ops().delete(model, query).await
    }

    async fn create_many(&self, model: &str, batch: Vec<Fields>) -> StorageResult<u64> {
        self.ops().create_many(model, batch).await
    }

    async fn update_many(&self, model: &str, mutation: &Mutation) -> StorageResult<u64> {
        self.ops().update_many(model, mutation).await
    }

    async fn delete_many(&self, model: &str, query: &Query) -> StorageResult<u64> {
        self.ops().delete_many(model, query).await
    }
}
