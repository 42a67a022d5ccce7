//! # Local Adapter
//!
//! Adapter over the on-device store. Every write is marked
//! `syncStatus = pending` so a sync pass can find it and push it upstream.
//!
//! ## Write Path
//! ```text
//! create / update ──► stamp (createdAt, updatedAt, syncStatus=pending)
//!                 ──► begin ──► write ──► commit
//!
//! sync ──► for each syncable model:
//!            pending records ──► Replica::push (cloud store)
//!                            ──► settle: syncStatus=synced, lastSyncedAt
//!      ──► record last sync time (best effort)
//! ```
//!
//! A failed connect is not retried: a local path that cannot be opened is
//! a configuration problem, not a transient one.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::json;
use strata_core::{
    fields, timestamp, AdapterKind, BestEffort, Fields, Mutation, Query, Record, SyncResult,
    SyncStatus,
};
use strata_db::{open_store, RecordStore};
use tracing::{debug, error, info, warn};

use crate::adapter::{AdapterCore, RecordOps, StorageAdapter};
use crate::config::{process_env, EnvLookup, StorageOptions, DEFAULT_LOCAL_URL, LOCAL_URL_ENV};
use crate::error::{StorageError, StorageResult};
use crate::replica::{as_synced, Replica, Settlement};
use crate::transaction::{Transaction, WriteStamp};

/// Connections kept open against the local store.
const LOCAL_POOL_SIZE: u32 = 5;

/// Adapter over the on-device store.
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    core: Arc<AdapterCore>,
}

impl LocalAdapter {
    /// Builds the adapter, resolving the connection string from the
    /// options, then `LOCAL_DATABASE_URL`, then `file:./local.db`.
    pub fn new(options: StorageOptions) -> StorageResult<Self> {
        let url = resolve_url(&options, &process_env);
        let store = open_store(&url, LOCAL_POOL_SIZE)
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;
        Ok(Self::with_store(options, store))
    }

    /// Builds the adapter over an existing store.
    pub fn with_store(options: StorageOptions, store: Arc<dyn RecordStore>) -> Self {
        LocalAdapter {
            core: Arc::new(AdapterCore::new(AdapterKind::Local, options, store)),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.core.store
    }

    /// Points sync passes at the cloud store.
    pub fn link_replica(&self, cloud: Arc<dyn RecordStore>) {
        self.core.link_replica(cloud);
    }

    /// Opens a transaction whose writes are marked pending.
    pub async fn begin(&self) -> StorageResult<Transaction> {
        self.core.begin(WriteStamp::PendingSync).await
    }

    /// Records of `model` still waiting to be pushed.
    pub async fn get_pending_sync_data(&self, model: &str) -> StorageResult<Vec<Record>> {
        let pending = Query::new().filter(fields::SYNC_STATUS, json!(SyncStatus::Pending.as_str()));
        self.find_many(model, &pending).await
    }

    /// Pending records across all syncable models.
    pub async fn pending_count(&self) -> BestEffort<u64> {
        let mut total = 0u64;
        for model in self.core.store.models().syncable() {
            match self.get_pending_sync_data(model).await {
                Ok(records) => total += records.len() as u64,
                Err(e) => {
                    warn!(model = %model, error = %e, "Failed to count pending records");
                    return BestEffort::Failed(e.to_string());
                }
            }
        }
        BestEffort::Done(total)
    }

    /// Marks records as synced. Failures are logged and reported, never
    /// raised.
    pub async fn mark_as_synced(&self, model: &str, ids: &[String]) -> BestEffort<u64> {
        if ids.is_empty() {
            return BestEffort::Done(0);
        }

        let mut patch = Fields::new();
        patch.insert(fields::SYNC_STATUS.into(), SyncStatus::Synced.into());
        patch.insert(fields::LAST_SYNCED_AT.into(), timestamp(Utc::now()));
        let mutation = Mutation::new(Query::new().filter(fields::ID, json!({ "in": ids })), patch);

        let outcome: BestEffort<u64> = self.write_unstamped(model, &mutation).await.into();
        match &outcome {
            BestEffort::Done(count) => debug!(model = %model, count, "Records marked as synced"),
            BestEffort::Failed(reason) => {
                warn!(model = %model, error = %reason, "Failed to mark records as synced")
            }
        }
        outcome
    }

    async fn write_unstamped(&self, model: &str, mutation: &Mutation) -> StorageResult<u64> {
        let tx = self.core.begin(WriteStamp::Unstamped).await?;
        let count = tx.update_many(model, mutation).await?;
        tx.commit().await?;
        Ok(count)
    }

    /// Applies push settlements. A record edited while the push ran keeps
    /// its pending marker for the next pass.
    async fn settle(
        &self,
        model: &str,
        settled: &[Settlement],
        now: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let tx = self.core.begin(WriteStamp::Unstamped).await?;
        let mut count = 0u64;

        for settlement in settled {
            let Some(current) = tx.find_unique(model, &Query::by_id(&settlement.id)).await? else {
                continue;
            };
            if current.updated_at() != settlement.seen {
                debug!(model = %model, id = %settlement.id, "Edited during push, left pending");
                continue;
            }
            let record = settlement.replacement.clone().unwrap_or(current);
            tx.upsert(model, &as_synced(record, now)).await?;
            count += 1;
        }

        tx.commit().await?;
        Ok(count)
    }

    async fn push_model(
        &self,
        model: &str,
        replica: &Replica,
        now: DateTime<Utc>,
    ) -> StorageResult<(u64, u64)> {
        let pending = self.get_pending_sync_data(model).await?;
        if pending.is_empty() {
            return Ok((0, 0));
        }

        let policy = self.core.options.conflict_resolution;
        let outcome = replica.push(model, &pending, policy).await?;

        if let Err(e) = self.settle(model, &outcome.settled, now).await {
            warn!(model = %model, error = %e, "Pushed records stay pending until the next pass");
        }

        Ok((outcome.settled.len() as u64, outcome.conflicts))
    }
}

fn resolve_url(options: &StorageOptions, env: EnvLookup<'_>) -> String {
    options
        .connection_string
        .clone()
        .filter(|url| !url.trim().is_empty())
        .or_else(|| env(LOCAL_URL_ENV))
        .unwrap_or_else(|| DEFAULT_LOCAL_URL.to_string())
}

// =============================================================================
// Adapter Contract
// =============================================================================

#[async_trait]
impl StorageAdapter for LocalAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Local
    }

    fn options(&self) -> &StorageOptions {
        &self.core.options
    }

    async fn connect(&self) -> StorageResult<()> {
        if self.core.is_connected() {
            return Ok(());
        }

        if let Err(e) = self.core.store.open().await {
            error!(error = %e, "Failed to open local store");
            return Err(StorageError::ConnectFailed {
                adapter: AdapterKind::Local,
                attempts: 1,
                reason: e.to_string(),
            });
        }

        self.core.set_connected(true);
        info!(backend = %self.core.store.backend(), "Local adapter connected");

        if self.core.options.sync_enabled && self.core.options.auto_sync {
            self.start_auto_sync();
        }
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        if !self.core.is_connected() {
            return Ok(());
        }
        self.core.store.close().await;
        self.core.set_connected(false);
        info!("Local adapter disconnected");
        Ok(())
    }

    fn connection_status(&self) -> bool {
        self.core.is_connected()
    }

    async fn sync(&self) -> SyncResult {
        let started = Utc::now();

        if !self.core.options.sync_enabled {
            return SyncResult::failed(started, "Sync is not enabled for the local adapter");
        }
        if !self.core.is_connected() {
            return SyncResult::failed(started, "Local adapter is not connected");
        }

        let mut result = SyncResult::new(started);

        match self.core.replica() {
            Some(replica) => {
                for model in self.core.store.models().syncable() {
                    match self.push_model(model, &replica, started).await {
                        Ok((pushed, conflicts)) => {
                            result.records_synced += pushed;
                            result.conflicts_resolved += conflicts;
                        }
                        Err(e) => {
                            warn!(model = %model, error = %e, "Local sync failed for model");
                            result.push_error(format!("Failed to sync {model}: {e}"));
                        }
                    }
                }
            }
            None => debug!("No cloud replica linked, nothing to push"),
        }

        self.set_last_sync_time(started).await;
        result.last_sync_time = Utc::now();

        info!(
            records = result.records_synced,
            conflicts = result.conflicts_resolved,
            errors = result.errors.len(),
            "Local sync pass finished"
        );
        result
    }

    async fn last_sync_time(&self) -> BestEffort<Option<DateTime<Utc>>> {
        self.core.last_sync_time().await
    }

    async fn set_last_sync_time(&self, at: DateTime<Utc>) -> BestEffort<()> {
        self.core.set_last_sync_time(at).await
    }

    fn start_auto_sync(&self) {
        if !self.core.options.sync_enabled {
            debug!("Local sync disabled, auto-sync not started");
            return;
        }

        let core = Arc::downgrade(&self.core);
        self.core
            .auto_sync
            .start(self.core.options.sync_interval(), move || {
                core.upgrade().map(|core| async move {
                    let result = LocalAdapter { core }.sync().await;
                    if !result.success {
                        warn!(errors = ?result.errors, "Local auto-sync pass failed");
                    }
                })
            });
    }

    fn stop_auto_sync(&self) {
        self.core.auto_sync.stop();
    }

    fn transaction<'a, T, F>(&'a self, f: F) -> BoxFuture<'a, StorageResult<T>>
    where
        F: for<'t> FnOnce(&'t Transaction) -> BoxFuture<'t, StorageResult<T>> + Send + 'a,
        T: Send + 'a,
    {
        Box::pin(async move {
            let tx = self.begin().await?;
            match f(&tx).await {
                Ok(value) => {
                    tx.commit().await?;
                    Ok(value)
                }
                Err(e) => {
                    tx.abandon().await;
                    Err(e)
                }
            }
        })
    }
}

// =============================================================================
// Record Operations
// =============================================================================

#[async_trait]
impl RecordOps for LocalAdapter {
    async fn create(&self, model: &str, data: Fields) -> StorageResult<Record> {
        let tx = self.begin().await?;
        let record = tx.create(model, data).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn find_many(&self, model: &str, query: &Query) -> StorageResult<Vec<Record>> {
        let tx = self.begin().await?;
        let records = tx.find_many(model, query).await?;
        tx.rollback().await?;
        Ok(records)
    }

    async fn find_unique(&self, model: &str, query: &Query) -> StorageResult<Option<Record>> {
        let tx = self.begin().await?;
        let record = tx.find_unique(model, query).await?;
        tx.rollback().await?;
        Ok(record)
    }

    async fn update(&self, model: &str, mutation: &Mutation) -> StorageResult<Record> {
        let tx = self.begin().await?;
        let record = tx.update(model, mutation).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn delete(&self, model: &str, query: &Query) -> StorageResult<Record> {
        let tx = self.begin().await?;
        let record = tx.delete(model, query).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn create_many(&self, model: &str, batch: Vec<Fields>) -> StorageResult<u64> {
        let tx = self.begin().await?;
        let count = tx.create_many(model, batch).await?;
        tx.commit().await?;
        Ok(count)
    }

    async fn update_many(&self, model: &str, mutation: &Mutation) -> StorageResult<u64> {
        let tx = self.begin().await?;
        let count = tx.update_many(model, mutation).await?;
        tx.commit().await?;
        Ok(count)
    }

    async fn delete_many(&self, model: &str, query: &Query) -> StorageResult<u64> {
        let tx = self.begin().await?;
        let count = tx.delete_many(model, query).await?;
        tx.commit().await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db::MemoryStore;

    fn data(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    async fn connected(options: StorageOptions) -> LocalAdapter {
        let adapter = LocalAdapter::with_store(options, Arc::new(MemoryStore::new("local")));
        adapter.connect().await.unwrap();
        adapter
    }

    #[test]
    fn test_url_resolution_prefers_explicit_value() {
        let env = |key: &str| (key == LOCAL_URL_ENV).then(|| "sqlite:./env.db".to_string());

        let explicit = StorageOptions::with_connection("memory:explicit");
        assert_eq!(resolve_url(&explicit, &env), "memory:explicit");
        assert_eq!(resolve_url(&StorageOptions::default(), &env), "sqlite:./env.db");
        assert_eq!(resolve_url(&StorageOptions::default(), &|_: &str| None), DEFAULT_LOCAL_URL);
    }

    #[test]
    fn test_unsupported_scheme_is_a_config_error() {
        let err = LocalAdapter::new(StorageOptions::with_connection("postgresql://db/app"))
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_writes_are_marked_pending() {
        let adapter = connected(StorageOptions::default()).await;

        let record = adapter
            .create("user", data(json!({ "email": "a@x.com" })))
            .await
            .unwrap();
        assert!(record.is_pending());
        assert!(record.get(fields::CREATED_AT).is_some());

        let count = adapter
            .create_many(
                "message",
                vec![data(json!({ "content": "hi" })), data(json!({ "content": "yo" }))],
            )
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(adapter.get_pending_sync_data("message").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_as_synced_flips_status_without_touching_updated_at() {
        let adapter = connected(StorageOptions::default()).await;
        let record = adapter
            .create("user", data(json!({ "email": "a@x.com" })))
            .await
            .unwrap();
        let id = record.id().unwrap().to_string();

        let marked = adapter.mark_as_synced("user", &[id.clone()]).await;
        assert_eq!(marked, BestEffort::Done(1));

        let stored = adapter
            .find_unique("user", &Query::by_id(&id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_status(), Some(SyncStatus::Synced));
        assert!(stored.get(fields::LAST_SYNCED_AT).is_some());
        assert_eq!(stored.updated_at(), record.updated_at());
        assert_eq!(adapter.pending_count().await, BestEffort::Done(0));
    }

    #[tokio::test]
    async fn test_mark_as_synced_swallows_failures() {
        let adapter = connected(StorageOptions::default()).await;
        adapter.disconnect().await.unwrap();

        let outcome = adapter.mark_as_synced("user", &["u1".to_string()]).await;
        assert!(matches!(outcome, BestEffort::Failed(_)));
    }

    #[tokio::test]
    async fn test_sync_requires_opt_in() {
        let adapter = connected(StorageOptions::default()).await;
        let result = adapter.sync().await;

        assert!(!result.success);
        assert_eq!(result.errors, vec!["Sync is not enabled for the local adapter"]);
    }

    #[tokio::test]
    async fn test_sync_pushes_pending_records_to_replica() {
        let options = StorageOptions {
            sync_enabled: true,
            auto_sync: false,
            ..Default::default()
        };
        let adapter = connected(options).await;

        let cloud: Arc<dyn RecordStore> = Arc::new(MemoryStore::new("cloud"));
        cloud.open().await.unwrap();
        adapter.link_replica(cloud.clone());

        for email in ["a@x.com", "b@x.com"] {
            adapter.create("user", data(json!({ "email": email }))).await.unwrap();
        }

        let result = adapter.sync().await;
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.records_synced, 2);
        assert_eq!(adapter.pending_count().await, BestEffort::Done(0));
        assert!(adapter.last_sync_time().await.ok().flatten().is_some());

        let cloud_copy = LocalAdapter::with_store(StorageOptions::default(), cloud);
        let pushed = cloud_copy.find_many("user", &Query::all()).await.unwrap();
        assert_eq!(pushed.len(), 2);
        assert!(pushed.iter().all(|r| r.cloud_synced_at().is_some()));
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let adapter = connected(StorageOptions::default()).await;

        let err = adapter
            .transaction(|tx| {
                Box::pin(async move {
                    tx.create("user", data(json!({ "email": "a@x.com" }))).await?;
                    tx.create("invoice", Fields::new()).await?;
                    Ok(())
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::ModelNotFound(_)));
        assert!(adapter.find_many("user", &Query::all()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_sync_runs_on_interval_until_cleanup() {
        let options = StorageOptions {
            sync_enabled: true,
            sync_interval_ms: 1_000,
            ..Default::default()
        };
        let adapter = connected(options).await;
        assert!(adapter.core.auto_sync.is_running());

        tokio::time::sleep(std::time::Duration::from_millis(1_500)).await;
        assert!(adapter.last_sync_time().await.ok().flatten().is_some());

        adapter.cleanup().await.unwrap();
        adapter.cleanup().await.unwrap();
        assert!(!adapter.connection_status());
        assert!(!adapter.core.auto_sync.is_running());
    }
}
