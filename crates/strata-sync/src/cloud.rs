//! # Cloud Adapter
//!
//! Adapter over the remote store. Adds bounded retry with backoff around
//! every operation and reconnects when a failure looks like the network.
//!
//! ## Retry Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         with_retry(op)                                  │
//! │                                                                         │
//! │   attempt 1 ──► op() ──ok──► return                                    │
//! │                   │                                                     │
//! │                   err                                                   │
//! │                   │                                                     │
//! │          logical error? ──yes──► return it (ModelNotFound, NotFound,   │
//! │                   │ no                       duplicates)                │
//! │          attempts spent? ──yes──► return last error                    │
//! │                   │ no                                                  │
//! │                   ▼                                                     │
//! │          sleep(backoff)       1s, 1s, 1s ... (multiplier 1.0)          │
//! │                   │                                                     │
//! │          network error? ──yes──► mark disconnected, reconnect once     │
//! │                   │                                                     │
//! │                   ▼                                                     │
//! │   attempt 2 ──► op() ...                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Connect
//! `connect()` opens the store and probes it, up to `retry_attempts` times
//! with the same backoff between attempts. Running out of attempts fails
//! with a message naming the attempt count.
//!
//! ## Sync
//! Pulls every syncable model's records whose `cloudSyncedAt` is after the
//! last cloud sync (all of them on the first pass), oldest first, into the
//! linked local store. `cloudSyncedAt` is stamped on every cloud write, so
//! a record pushed late by another device still lands inside the window.
//! The window itself is kept in the linked local store, one per device.
//! A failing model is reported and the pass moves on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use strata_core::{
    fields, timestamp, AdapterKind, BestEffort, Fields, Mutation, Query, Record, SortDirection,
    SyncResult,
};
use strata_db::{open_store, RecordStore};
use tracing::{debug, error, info, warn};

use crate::adapter::{AdapterCore, RecordOps, StorageAdapter};
use crate::config::{
    process_env, CloudProvider, CloudStorageOptions, EnvLookup, StorageOptions, CLOUD_URL_ENV,
};
use crate::error::{StorageError, StorageResult};
use crate::replica::Replica;
use crate::transaction::{Transaction, WriteStamp};

/// Upper bound for a single backoff delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Snapshot of the cloud connection for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    #[serde(rename = "type")]
    pub adapter: AdapterKind,
    pub provider: CloudProvider,
    pub region: Option<String>,
    pub connected: bool,
    pub sync_enabled: bool,
    pub last_health_check: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct CloudState {
    settings: CloudStorageOptions,
    last_health_check: Mutex<Option<DateTime<Utc>>>,
}

/// Adapter over the remote store.
#[derive(Debug, Clone)]
pub struct CloudAdapter {
    core: Arc<AdapterCore>,
    cloud: Arc<CloudState>,
}

impl CloudAdapter {
    /// Builds the adapter. The connection string comes from the options,
    /// then `CLOUD_DATABASE_URL`, then `DATABASE_URL`; without one the
    /// adapter cannot be built.
    pub fn new(options: CloudStorageOptions) -> StorageResult<Self> {
        let url = resolve_url(&options, &process_env)
            .ok_or(StorageError::MissingConnectionString(AdapterKind::Cloud))?;
        let store = open_store(&url, options.pool_size)
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;
        Ok(Self::with_store(options, store))
    }

    /// Builds the adapter over an existing store.
    pub fn with_store(options: CloudStorageOptions, store: Arc<dyn RecordStore>) -> Self {
        let core = AdapterCore::new(AdapterKind::Cloud, options.base.clone(), store);
        CloudAdapter {
            core: Arc::new(core),
            cloud: Arc::new(CloudState {
                settings: options,
                last_health_check: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &CloudStorageOptions {
        &self.cloud.settings
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.core.store
    }

    /// Points sync passes at the local store.
    pub fn link_replica(&self, local: Arc<dyn RecordStore>) {
        self.core.link_replica(local);
    }

    /// Probes the remote store directly, regardless of the connection flag.
    pub async fn health_check(&self) -> bool {
        let healthy = match self.core.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Cloud health check failed");
                false
            }
        };
        *self.cloud.last_health_check.lock() = Some(Utc::now());
        healthy
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            adapter: AdapterKind::Cloud,
            provider: self.cloud.settings.provider,
            region: self.cloud.settings.region.clone(),
            connected: self.core.is_connected(),
            sync_enabled: self.core.options.sync_enabled,
            last_health_check: *self.cloud.last_health_check.lock(),
        }
    }

    fn attempts(&self) -> u32 {
        self.cloud.settings.retry_attempts.max(1)
    }

    fn backoff(&self) -> ExponentialBackoff {
        let initial = self.cloud.settings.retry_delay();
        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: 0.0,
            multiplier: self.cloud.settings.retry_backoff_multiplier,
            max_interval: initial.max(MAX_RETRY_DELAY),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// One open-and-probe attempt. Leaves the store closed on failure.
    async fn open_and_probe(&self) -> StorageResult<()> {
        self.core.store.open().await?;
        if let Err(e) = self.core.store.ping().await {
            self.core.store.close().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Drops the current connection and tries once to get a fresh one.
    async fn reconnect(&self) {
        self.core.set_connected(false);
        self.core.store.close().await;

        match self.open_and_probe().await {
            Ok(()) => {
                self.core.set_connected(true);
                info!("Cloud adapter reconnected");
            }
            Err(e) => warn!(error = %e, "Cloud reconnect failed"),
        }
    }

    /// Runs `op` up to `retry_attempts` times.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut op: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = StorageResult<T>> + Send,
        T: Send,
    {
        let attempts = self.attempts();
        let mut backoff = self.backoff();
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    debug!(operation, error = %e, "Cloud operation failed, not retryable");
                    return Err(e);
                }
                Err(e) if attempt >= attempts => {
                    error!(operation, attempts, error = %e, "Cloud operation failed, giving up");
                    return Err(e);
                }
                Err(e) => {
                    let network = e.is_network_error();
                    warn!(operation, attempt, attempts, network, error = %e, "Cloud operation failed, retrying");

                    let delay = backoff.next_backoff().unwrap_or(self.cloud.settings.retry_delay());
                    tokio::time::sleep(delay).await;

                    if network {
                        self.reconnect().await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn pull_model(
        &self,
        model: &str,
        since: Option<DateTime<Utc>>,
        replica: Option<&Replica>,
        now: DateTime<Utc>,
    ) -> StorageResult<(u64, u64)> {
        let mut query = Query::new().order_by(fields::CLOUD_SYNCED_AT, SortDirection::Asc);
        if let Some(since) = since {
            query = query.filter(fields::CLOUD_SYNCED_AT, json!({ "gt": timestamp(since) }));
        }

        let changed = self.find_many(model, &query).await?;
        let fetched = changed.len() as u64;
        debug!(model = %model, fetched, "Fetched cloud changes");

        let conflicts = match replica {
            Some(replica) if !changed.is_empty() => {
                let policy = self.core.options.conflict_resolution;
                replica.pull(model, &changed, policy, now).await?
            }
            _ => 0,
        };

        Ok((fetched, conflicts))
    }
}

fn resolve_url(options: &CloudStorageOptions, env: EnvLookup<'_>) -> Option<String> {
    options
        .base
        .connection_string
        .clone()
        .filter(|url| !url.trim().is_empty())
        .or_else(|| CLOUD_URL_ENV.iter().find_map(|key| env(key)))
}

// =============================================================================
// Adapter Contract
// =============================================================================

#[async_trait]
impl StorageAdapter for CloudAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Cloud
    }

    fn options(&self) -> &StorageOptions {
        &self.core.options
    }

    async fn connect(&self) -> StorageResult<()> {
        if self.core.is_connected() {
            return Ok(());
        }

        let attempts = self.attempts();
        let mut backoff = self.backoff();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.open_and_probe().await {
                Ok(()) => {
                    self.core.set_connected(true);
                    info!(
                        attempt,
                        provider = %self.cloud.settings.provider,
                        backend = %self.core.store.backend(),
                        "Cloud adapter connected"
                    );
                    if self.core.options.sync_enabled && self.core.options.auto_sync {
                        self.start_auto_sync();
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Cloud connection attempt failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        let delay =
                            backoff.next_backoff().unwrap_or(self.cloud.settings.retry_delay());
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        error!(attempts, "Cloud adapter could not connect");
        Err(StorageError::ConnectFailed {
            adapter: AdapterKind::Cloud,
            attempts,
            reason: last_error,
        })
    }

    async fn disconnect(&self) -> StorageResult<()> {
        if !self.core.is_connected() {
            return Ok(());
        }
        self.core.store.close().await;
        self.core.set_connected(false);
        info!("Cloud adapter disconnected");
        Ok(())
    }

    fn connection_status(&self) -> bool {
        self.core.is_connected()
    }

    async fn sync(&self) -> SyncResult {
        let started = Utc::now();
        let mut result = SyncResult::new(started);

        if !self.core.is_connected() {
            if let Err(e) = self.connect().await {
                result.push_error(format!("Cloud sync failed: {e}"));
            }
        }

        if result.success {
            let since = self.core.last_sync_time().await.ok().flatten();
            let replica = self.core.replica();

            for model in self.core.store.models().syncable() {
                match self.pull_model(model, since, replica.as_ref(), started).await {
                    Ok((fetched, conflicts)) => {
                        result.records_synced += fetched;
                        result.conflicts_resolved += conflicts;
                    }
                    Err(e) => {
                        warn!(model = %model, error = %e, "Cloud sync failed for model");
                        result.push_error(format!("Failed to sync {model}: {e}"));
                    }
                }
            }
        }

        self.set_last_sync_time(started).await;
        result.last_sync_time = Utc::now();

        info!(
            records = result.records_synced,
            conflicts = result.conflicts_resolved,
            errors = result.errors.len(),
            "Cloud sync pass finished"
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
            debug!("Cloud sync disabled, auto-sync not started");
            return;
        }

        let core = Arc::downgrade(&self.core);
        let cloud = self.cloud.clone();
        self.core
            .auto_sync
            .start(self.core.options.sync_interval(), move || {
                let cloud = cloud.clone();
                core.upgrade().map(|core| async move {
                    let result = CloudAdapter { core, cloud }.sync().await;
                    if !result.success {
                        warn!(errors = ?result.errors, "Cloud auto-sync pass failed");
                    }
                })
            });
    }

    fn stop_auto_sync(&self) {
        self.core.auto_sync.stop();
    }

    /// Acquiring the transaction is retried like any operation; the
    /// closure itself runs once, bounded by the configured timeout.
    fn transaction<'a, T, F>(&'a self, f: F) -> BoxFuture<'a, StorageResult<T>>
    where
        F: for<'t> FnOnce(&'t Transaction) -> BoxFuture<'t, StorageResult<T>> + Send + 'a,
        T: Send + 'a,
    {
        Box::pin(async move {
            let tx = self
                .with_retry("transaction", move || self.core.begin(WriteStamp::CloudSynced))
                .await?;

            let limit = self.cloud.settings.timeout();
            match tokio::time::timeout(limit, f(&tx)).await {
                Ok(Ok(value)) => {
                    tx.commit().await?;
                    Ok(value)
                }
                Ok(Err(e)) => {
                    tx.abandon().await;
                    Err(e)
                }
                Err(_) => {
                    tx.abandon().await;
                    Err(StorageError::Timeout(format!(
                        "transaction exceeded {}ms",
                        limit.as_millis()
                    )))
                }
            }
        })
    }
}

// =============================================================================
// Record Operations
// =============================================================================

#[async_trait]
impl RecordOps for CloudAdapter {
    async fn create(&self, model: &str, data: Fields) -> StorageResult<Record> {
        let data = &data;
        self.with_retry("create", move || async move {
            let tx = self.core.begin(WriteStamp::CloudSynced).await?;
            let record = tx.create(model, data.clone()).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    async fn find_many(&self, model: &str, query: &Query) -> StorageResult<Vec<Record>> {
        self.with_retry("find_many", move || async move {
            let tx = self.core.begin(WriteStamp::CloudSynced).await?;
            let records = tx.find_many(model, query).await?;
            tx.rollback().await?;
            Ok(records)
        })
        .await
    }

    async fn find_unique(&self, model: &str, query: &Query) -> StorageResult<Option<Record>> {
        self.with_retry("find_unique", move || async move {
            let tx = self.core.begin(WriteStamp::CloudSynced).await?;
            let record = tx.find_unique(model, query).await?;
            tx.rollback().await?;
            Ok(record)
        })
        .await
    }

    async fn update(&self, model: &str, mutation: &Mutation) -> StorageResult<Record> {
        self.with_retry("update", move || async move {
            let tx = self.core.begin(WriteStamp::CloudSynced).await?;
            let record = tx.update(model, mutation).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    async fn delete(&self, model: &str, query: &Query) -> StorageResult<Record> {
        self.with_retry("delete", move || async move {
            let tx = self.core.begin(WriteStamp::CloudSynced).await?;
            let record = tx.delete(model, query).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    async fn create_many(&self, model: &str, batch: Vec<Fields>) -> StorageResult<u64> {
        let batch = &batch;
        self.with_retry("create_many", move || async move {
            let tx = self.core.begin(WriteStamp::CloudSynced).await?;
            let count = tx.create_many(model, batch.clone()).await?;
            tx.commit().await?;
            Ok(count)
        })
        .await
    }

    async fn update_many(&self, model: &str, mutation: &Mutation) -> StorageResult<u64> {
        self.with_retry("update_many", move || async move {
            let tx = self.core.begin(WriteStamp::CloudSynced).await?;
            let count = tx.update_many(model, mutation).await?;
            tx.commit().await?;
            Ok(count)
        })
        .await
    }

    async fn delete_many(&self, model: &str, query: &Query) -> StorageResult<u64> {
        self.with_retry("delete_many", move || async move {
            let tx = self.core.begin(WriteStamp::CloudSynced).await?;
            let count = tx.delete_many(model, query).await?;
            tx.commit().await?;
            Ok(count)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_db::MemoryStore;

    fn data(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    fn options(retry_attempts: u32) -> CloudStorageOptions {
        CloudStorageOptions {
            retry_attempts,
            ..CloudStorageOptions::with_connection("memory:cloud")
        }
    }

    fn adapter(retry_attempts: u32) -> (CloudAdapter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new("cloud"));
        (CloudAdapter::with_store(options(retry_attempts), store.clone()), store)
    }

    #[test]
    fn test_missing_connection_string_is_fatal() {
        assert_eq!(resolve_url(&CloudStorageOptions::default(), &|_: &str| None), None);

        let env = |key: &str| (key == "DATABASE_URL").then(|| "memory:generic".to_string());
        assert_eq!(
            resolve_url(&CloudStorageOptions::default(), &env).as_deref(),
            Some("memory:generic")
        );
        assert_eq!(
            resolve_url(&CloudStorageOptions::with_connection("memory:explicit"), &env).as_deref(),
            Some("memory:explicit")
        );
    }

    #[test]
    fn test_fixed_delay_backoff() {
        let (cloud, _) = adapter(3);
        let mut backoff = cloud.backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_then_succeeds() {
        let (cloud, store) = adapter(3);
        store.fail_next_opens(2, "connect ETIMEDOUT");

        cloud.connect().await.unwrap();
        assert!(cloud.connection_status());
        assert_eq!(store.open_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_budget() {
        let (cloud, store) = adapter(2);
        store.set_reachable(false);

        let started = tokio::time::Instant::now();
        let err = cloud.connect().await.unwrap_err();

        assert!(err.to_string().contains("2 attempts"), "{err}");
        assert_eq!(store.open_attempts(), 2);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!cloud.connection_status());
    }

    #[tokio::test]
    async fn test_writes_stamp_cloud_synced_at() {
        let (cloud, _) = adapter(3);
        cloud.connect().await.unwrap();

        let before = Utc::now();
        let created = cloud
            .create("user", data(json!({ "email": "a@x.com" })))
            .await
            .unwrap();
        assert!(created.cloud_synced_at().unwrap() >= before);
        assert!(created.get(fields::SYNC_STATUS).is_none());

        let id = created.id().unwrap().to_string();
        let later = Utc::now();
        let updated = cloud
            .update(
                "user",
                &Mutation::new(Query::by_id(&id), data(json!({ "username": "a" }))),
            )
            .await
            .unwrap();
        assert!(updated.cloud_synced_at().unwrap() >= later);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failures_are_retried_without_reconnect() {
        let (cloud, store) = adapter(3);
        cloud.connect().await.unwrap();
        let opens = store.open_attempts();

        store.fail_next_operations(2, "database is locked");
        let record = cloud.create("user", data(json!({ "email": "a@x.com" }))).await;

        assert!(record.is_ok());
        assert_eq!(store.open_attempts(), opens);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_trigger_reconnect() {
        let (cloud, store) = adapter(3);
        cloud.connect().await.unwrap();
        let opens = store.open_attempts();

        store.set_reachable(false);
        let err = cloud.find_many("user", &Query::all()).await.unwrap_err();

        assert!(err.is_network_error());
        assert_eq!(store.open_attempts(), opens + 2);
        assert!(!cloud.connection_status());

        store.set_reachable(true);
        cloud.connect().await.unwrap();
        assert!(cloud.find_many("user", &Query::all()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logical_errors_are_not_retried() {
        let (cloud, store) = adapter(3);
        cloud.connect().await.unwrap();

        let operations = store.operation_attempts();
        let started = tokio::time::Instant::now();
        let err = cloud.create("invoice", Fields::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::ModelNotFound(m) if m == "invoice"));
        assert_eq!(store.operation_attempts() - operations, 1);
        assert!(started.elapsed() < Duration::from_secs(1));

        cloud
            .create("user", data(json!({ "email": "a@x.com" })))
            .await
            .unwrap();
        let operations = store.operation_attempts();
        let err = cloud
            .create("user", data(json!({ "email": "a@x.com" })))
            .await
            .unwrap_err();
        assert!(!err.is_retryable(), "{err}");
        assert_eq!(store.operation_attempts() - operations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transaction_timeout_rolls_back() {
        let store = Arc::new(MemoryStore::new("cloud"));
        let cloud = CloudAdapter::with_store(
            CloudStorageOptions {
                timeout_ms: 100,
                ..options(1)
            },
            store,
        );
        cloud.connect().await.unwrap();

        let err = cloud
            .transaction(|tx| {
                Box::pin(async move {
                    tx.create("user", data(json!({ "email": "slow@x.com" }))).await?;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(())
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Timeout(_)));
        assert!(cloud.find_many("user", &Query::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_counts_changes_and_advances_window() {
        let (cloud, _) = adapter(1);
        cloud.connect().await.unwrap();
        for email in ["a@x.com", "b@x.com"] {
            cloud.create("user", data(json!({ "email": email }))).await.unwrap();
        }

        let first = cloud.sync().await;
        assert!(first.success);
        assert_eq!(first.records_synced, 2);

        let second = cloud.sync().await;
        assert!(second.success);
        assert_eq!(second.records_synced, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_reports_unreachable_store() {
        let (cloud, store) = adapter(2);
        store.set_reachable(false);

        let result = cloud.sync().await;
        assert!(!result.success);
        assert!(result.errors[0].contains("2 attempts"));
        assert!(matches!(
            cloud.last_sync_time().await,
            BestEffort::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_health_check_is_independent_of_flag() {
        let (cloud, store) = adapter(1);
        assert!(!cloud.health_check().await);

        cloud.connect().await.unwrap();
        assert!(cloud.health_check().await);

        store.set_reachable(false);
        assert!(cloud.connection_status());
        assert!(!cloud.health_check().await);

        let info = cloud.connection_info();
        assert_eq!(info.provider, CloudProvider::Postgresql);
        assert!(info.last_health_check.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_twice() {
        let (cloud, _) = adapter(1);
        cloud.connect().await.unwrap();
        cloud.cleanup().await.unwrap();
        cloud.cleanup().await.unwrap();
        assert!(!cloud.connection_status());
    }
}
