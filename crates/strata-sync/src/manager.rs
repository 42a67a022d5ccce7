//! # Storage Manager
//!
//! The single entry point callers use instead of talking to adapters. It
//! owns mode selection, per-call routing with fallback, and the hybrid
//! sync schedule.
//!
//! ## Routing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     primary() on every call                             │
//! │                                                                         │
//! │  mode = local   ──► local adapter   (or AdapterUnavailable)            │
//! │  mode = cloud   ──► cloud adapter   (or AdapterUnavailable)            │
//! │  mode = hybrid  ──► primary_storage, if present and connected          │
//! │                     else the other one, if fallback_enabled and        │
//! │                     connected                                          │
//! │                     else NoAdapterAvailable                            │
//! │                                                                         │
//! │  Nothing is cached: a primary that reconnects is preferred again on    │
//! │  the next call.                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Hybrid Sync
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Triggers                                                               │
//! │    realtime  ── local write ──► Debouncer (1s) ──┐                     │
//! │    periodic  ── timer (sync_interval) ───────────┼──► sync()           │
//! │    manual    ── caller ──────────────────────────┘                     │
//! │                                                                         │
//! │  sync()                                                                 │
//! │    1. hybrid mode?             else SyncUnavailable                    │
//! │    2. claim in-progress flag   else SyncInProgress                     │
//! │    3. both adapters present?   else SyncUnavailable                    │
//! │    4. cloud connected? try once, report failure in the result          │
//! │    5. local.sync()  push pending ──► cloud                             │
//! │    6. cloud.sync()  pull changed ──► local                             │
//! │    7. merge results; flag released on every exit path                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use strata_core::{AdapterKind, Fields, Mutation, Query, Record, SyncResult};
use tracing::{debug, info, warn};

use crate::adapter::{AnyAdapter, RecordOps, StorageAdapter};
use crate::cloud::CloudAdapter;
use crate::config::{process_env, HybridSettings, StorageConfig, StorageMode, SyncStrategy};
use crate::error::{StorageError, StorageResult};
use crate::local::LocalAdapter;
use crate::scheduler::{Debouncer, Periodic};
use crate::transaction::Transaction;

// =============================================================================
// Status
// =============================================================================

/// Point-in-time snapshot of the manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStatus {
    pub mode: StorageMode,
    pub local: Option<LocalStatus>,
    pub cloud: Option<CloudStatus>,
    pub sync: SyncState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStatus {
    pub connected: bool,
    pub last_sync: Option<DateTime<Utc>>,
    /// Absent when the count could not be taken.
    pub pending_records: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudStatus {
    pub connected: bool,
    pub last_sync: Option<DateTime<Utc>>,
    /// Live probe result, taken while building the snapshot.
    pub healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub enabled: bool,
    pub strategy: SyncStrategy,
    pub in_progress: bool,
    pub last_result: Option<SyncResult>,
    pub completed_passes: u64,
}

// =============================================================================
// Adapter Set
// =============================================================================

#[derive(Debug, Clone, Default)]
struct AdapterSet {
    local: Option<LocalAdapter>,
    cloud: Option<CloudAdapter>,
}

impl AdapterSet {
    fn get(&self, kind: AdapterKind) -> Option<AnyAdapter> {
        match kind {
            AdapterKind::Local => self.local.clone().map(AnyAdapter::Local),
            AdapterKind::Cloud => self.cloud.clone().map(AnyAdapter::Cloud),
        }
    }

    /// Points each side's sync passes at the other side's store.
    fn link(&self) {
        if let (Some(local), Some(cloud)) = (&self.local, &self.cloud) {
            local.link_replica(cloud.store().clone());
            cloud.link_replica(local.store().clone());
        }
    }

    async fn cleanup(&self) {
        if let Some(local) = &self.local {
            if let Err(e) = local.cleanup().await {
                warn!(error = %e, "Local adapter cleanup failed");
            }
        }
        if let Some(cloud) = &self.cloud {
            if let Err(e) = cloud.cleanup().await {
                warn!(error = %e, "Cloud adapter cleanup failed");
            }
        }
    }
}

/// Builds the adapters a configuration calls for.
fn build_adapters(config: &StorageConfig) -> StorageResult<AdapterSet> {
    let hybrid = config.mode == StorageMode::Hybrid;
    let policy = config.hybrid.conflict_resolution;

    let local = if config.uses(AdapterKind::Local) {
        let mut options = config.local.options.clone();
        options.auto_sync = false;
        if hybrid {
            options.sync_enabled = true;
            options.conflict_resolution = policy;
        }
        Some(LocalAdapter::new(options)?)
    } else {
        None
    };

    let cloud = if config.uses(AdapterKind::Cloud) {
        let mut options = config.cloud.options.clone();
        options.base.auto_sync = false;
        if hybrid {
            options.base.sync_enabled = true;
            options.base.conflict_resolution = policy;
        }
        Some(CloudAdapter::new(options)?)
    } else {
        None
    };

    let adapters = AdapterSet { local, cloud };
    if hybrid {
        adapters.link();
    }
    Ok(adapters)
}

// =============================================================================
// Storage Manager
// =============================================================================

#[derive(Debug)]
struct Inner {
    config: RwLock<StorageConfig>,
    adapters: RwLock<AdapterSet>,
    /// Adapters handed in by the caller; mode switches select from these
    /// instead of building new ones.
    provided: Option<AdapterSet>,
    sync_in_progress: AtomicBool,
    last_result: Mutex<Option<SyncResult>>,
    completed_passes: AtomicU64,
    debouncer: Debouncer,
    periodic: Periodic,
}

/// Releases the in-progress flag however `sync()` exits.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Routes record operations to the local and/or cloud adapter and keeps
/// them in sync. Cheap to clone.
///
/// ## Example
/// ```rust,ignore
/// let manager = StorageManager::new(StorageConfig::load(None)?)?;
/// manager.connect().await?;
///
/// let user = manager.create("user", fields).await?;
/// let result = manager.sync().await?;
///
/// manager.cleanup().await?;
/// ```
#[derive(Debug, Clone)]
pub struct StorageManager {
    inner: Arc<Inner>,
}

impl StorageManager {
    /// Builds the manager and the adapters its configuration calls for.
    /// Missing connection strings are filled from the environment first.
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        let mut config = config;
        config.fill_connection_defaults(&process_env);
        config.validate()?;

        let adapters = build_adapters(&config)?;
        Ok(Self::from_parts(config, adapters, None))
    }

    /// Builds the manager over adapters the caller constructed. Each
    /// adapter keeps its own options; hybrid sync needs both to have
    /// `sync_enabled` set.
    pub fn with_adapters(
        config: StorageConfig,
        local: Option<LocalAdapter>,
        cloud: Option<CloudAdapter>,
    ) -> Self {
        let provided = AdapterSet { local, cloud };
        let adapters = select(&config, &provided);
        Self::from_parts(config, adapters, Some(provided))
    }

    fn from_parts(config: StorageConfig, adapters: AdapterSet, provided: Option<AdapterSet>) -> Self {
        info!(
            mode = %config.mode,
            local = adapters.local.is_some(),
            cloud = adapters.cloud.is_some(),
            "Storage manager created"
        );
        StorageManager {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                adapters: RwLock::new(adapters),
                provided,
                sync_in_progress: AtomicBool::new(false),
                last_result: Mutex::new(None),
                completed_passes: AtomicU64::new(0),
                debouncer: Debouncer::default(),
                periodic: Periodic::new("hybrid-sync"),
            }),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn mode(&self) -> StorageMode {
        self.inner.config.read().mode
    }

    /// A copy of the active configuration.
    pub fn config(&self) -> StorageConfig {
        self.inner.config.read().clone()
    }

    pub fn local(&self) -> Option<LocalAdapter> {
        self.inner.adapters.read().local.clone()
    }

    pub fn cloud(&self) -> Option<CloudAdapter> {
        self.inner.adapters.read().cloud.clone()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.sync_in_progress.load(Ordering::SeqCst)
    }

    fn adapters(&self) -> AdapterSet {
        self.inner.adapters.read().clone()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connects every adapter concurrently.
    ///
    /// In a single mode the sole adapter must connect. In hybrid mode a
    /// failed side is logged and the manager runs on the other, unless
    /// `offline_mode` is off and the cloud is the side that failed.
    pub async fn connect(&self) -> StorageResult<()> {
        let adapters = self.adapters();
        let (mode, hybrid) = {
            let config = self.inner.config.read();
            (config.mode, config.hybrid.clone())
        };

        let connect_local = async {
            match &adapters.local {
                Some(local) => Some(local.connect().await),
                None => None,
            }
        };
        let connect_cloud = async {
            match &adapters.cloud {
                Some(cloud) => Some(cloud.connect().await),
                None => None,
            }
        };
        let (local, cloud) = tokio::join!(connect_local, connect_cloud);

        match mode {
            StorageMode::Local => {
                local.unwrap_or(Err(StorageError::AdapterUnavailable(AdapterKind::Local)))?
            }
            StorageMode::Cloud => {
                cloud.unwrap_or(Err(StorageError::AdapterUnavailable(AdapterKind::Cloud)))?
            }
            StorageMode::Hybrid => {
                if let Some(Err(e)) = local {
                    warn!(error = %e, "Local store unavailable, continuing without it");
                }
                if let Some(Err(e)) = cloud {
                    if !hybrid.offline_mode {
                        return Err(e);
                    }
                    warn!(error = %e, "Cloud store unavailable, continuing offline");
                }

                if hybrid.sync_strategy == SyncStrategy::Periodic {
                    self.start_periodic_sync(&hybrid);
                }
            }
        }

        info!(mode = %mode, "Storage manager connected");
        Ok(())
    }

    /// Stops the sync schedule and disconnects every adapter.
    pub async fn disconnect(&self) -> StorageResult<()> {
        self.stop_schedules();
        let adapters = self.adapters();

        let disconnect_local = async {
            match &adapters.local {
                Some(local) => local.disconnect().await,
                None => Ok(()),
            }
        };
        let disconnect_cloud = async {
            match &adapters.cloud {
                Some(cloud) => cloud.disconnect().await,
                None => Ok(()),
            }
        };
        let (local, cloud) = tokio::join!(disconnect_local, disconnect_cloud);
        local?;
        cloud?;

        info!("Storage manager disconnected");
        Ok(())
    }

    /// Terminal teardown: disconnect, then clean up every adapter.
    /// Safe to call more than once.
    pub async fn cleanup(&self) -> StorageResult<()> {
        self.disconnect().await?;
        self.adapters().cleanup().await;
        debug!("Storage manager cleaned up");
        Ok(())
    }

    /// Re-initialises the manager in another mode. The old adapters are
    /// cleaned up and the new set is connected; nothing in flight against
    /// the old adapters is carried over.
    pub async fn switch_mode(&self, mode: StorageMode) -> StorageResult<()> {
        let mut config = self.config();
        if config.mode == mode {
            return Ok(());
        }

        info!(from = %config.mode, to = %mode, "Switching storage mode");
        config.mode = mode;

        let adapters = match &self.inner.provided {
            Some(provided) => select(&config, provided),
            None => {
                config.validate()?;
                build_adapters(&config)?
            }
        };

        self.stop_schedules();
        let previous = std::mem::replace(&mut *self.inner.adapters.write(), adapters);
        *self.inner.config.write() = config;
        previous.cleanup().await;

        self.connect().await
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Resolves the adapter the next operation goes to.
    pub fn primary(&self) -> StorageResult<AnyAdapter> {
        let config = self.inner.config.read();
        let adapters = self.inner.adapters.read();

        match config.mode {
            StorageMode::Local => adapters
                .get(AdapterKind::Local)
                .ok_or(StorageError::AdapterUnavailable(AdapterKind::Local)),
            StorageMode::Cloud => adapters
                .get(AdapterKind::Cloud)
                .ok_or(StorageError::AdapterUnavailable(AdapterKind::Cloud)),
            StorageMode::Hybrid => {
                let preferred = config.hybrid.primary_storage;
                if let Some(adapter) = adapters.get(preferred).filter(|a| a.connection_status()) {
                    return Ok(adapter);
                }

                if config.hybrid.fallback_enabled {
                    let fallback = preferred.other();
                    if let Some(adapter) = adapters.get(fallback).filter(|a| a.connection_status()) {
                        debug!(primary = %preferred, fallback = %fallback, "Primary unavailable, using fallback");
                        return Ok(adapter);
                    }
                }

                Err(StorageError::NoAdapterAvailable)
            }
        }
    }

    /// Runs `f` in a transaction on the resolved adapter.
    pub async fn transaction<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: for<'t> FnOnce(&'t Transaction) -> BoxFuture<'t, StorageResult<T>> + Send,
        T: Send,
    {
        let adapter = self.primary()?;
        let value = adapter.transaction(f).await?;
        self.after_write(adapter.kind());
        Ok(value)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Runs one hybrid sync pass: push local changes, then pull cloud ones.
    ///
    /// Fails only on the manager's own guards. Everything that goes wrong
    /// inside the pass is reported in the returned result.
    pub async fn sync(&self) -> StorageResult<SyncResult> {
        if self.mode() != StorageMode::Hybrid {
            return Err(StorageError::SyncUnavailable(
                "Sync is only available in hybrid mode".into(),
            ));
        }

        if self
            .inner
            .sync_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StorageError::SyncInProgress);
        }
        let _guard = SyncGuard(&self.inner.sync_in_progress);

        let adapters = self.adapters();
        let (Some(local), Some(cloud)) = (adapters.local, adapters.cloud) else {
            return Err(StorageError::SyncUnavailable(
                "Both local and cloud adapters are required for sync".into(),
            ));
        };

        let started = Utc::now();
        info!("Hybrid sync started");

        let result = match cloud.connect().await {
            Ok(()) => {
                let mut result = local.sync().await;
                result.merge(cloud.sync().await);
                result
            }
            Err(e) => {
                warn!(error = %e, "Cloud unreachable, sync pass skipped");
                SyncResult::failed(started, format!("Cloud store unavailable: {e}"))
            }
        };

        *self.inner.last_result.lock() = Some(result.clone());
        let passes = self.inner.completed_passes.fetch_add(1, Ordering::SeqCst) + 1;

        info!(
            success = result.success,
            records = result.records_synced,
            conflicts = result.conflicts_resolved,
            errors = result.errors.len(),
            passes,
            "Hybrid sync finished"
        );
        Ok(result)
    }

    /// Clears the in-progress flag, then syncs.
    ///
    /// Recovers from a pass that never released the flag. If a pass is
    /// genuinely still running, the two will overlap.
    pub async fn force_sync(&self) -> StorageResult<SyncResult> {
        if self.inner.sync_in_progress.swap(false, Ordering::SeqCst) {
            warn!("Forcing sync over an in-progress flag");
        }
        self.sync().await
    }

    /// Number of sync passes that ran to completion.
    pub fn completed_passes(&self) -> u64 {
        self.inner.completed_passes.load(Ordering::SeqCst)
    }

    /// Assembles a status snapshot. Bookkeeping lookups that fail leave
    /// their field empty.
    pub async fn status(&self) -> StorageStatus {
        let adapters = self.adapters();
        let (mode, strategy) = {
            let config = self.inner.config.read();
            (config.mode, config.hybrid.sync_strategy)
        };

        let local = match &adapters.local {
            Some(local) => Some(LocalStatus {
                connected: local.connection_status(),
                last_sync: local.last_sync_time().await.ok().flatten(),
                pending_records: local.pending_count().await.ok(),
            }),
            None => None,
        };

        let cloud = match &adapters.cloud {
            Some(cloud) => Some(CloudStatus {
                connected: cloud.connection_status(),
                last_sync: cloud.last_sync_time().await.ok().flatten(),
                healthy: cloud.health_check().await,
            }),
            None => None,
        };

        StorageStatus {
            mode,
            sync: SyncState {
                enabled: mode == StorageMode::Hybrid && local.is_some() && cloud.is_some(),
                strategy,
                in_progress: self.is_syncing(),
                last_result: self.inner.last_result.lock().clone(),
                completed_passes: self.completed_passes(),
            },
            local,
            cloud,
        }
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    fn start_periodic_sync(&self, hybrid: &HybridSettings) {
        let inner = Arc::downgrade(&self.inner);
        self.inner.periodic.start(hybrid.sync_interval(), move || {
            inner.upgrade().map(|inner| async move {
                StorageManager { inner }.scheduled_sync("periodic").await;
            })
        });
    }

    /// Arms the debounced sync after a write that landed locally in
    /// realtime hybrid mode.
    fn after_write(&self, target: AdapterKind) {
        let (mode, strategy) = {
            let config = self.inner.config.read();
            (config.mode, config.hybrid.sync_strategy)
        };
        if mode != StorageMode::Hybrid
            || target != AdapterKind::Local
            || strategy != SyncStrategy::Realtime
        {
            return;
        }

        let inner = Arc::downgrade(&self.inner);
        self.inner.debouncer.schedule(move || async move {
            if let Some(inner) = inner.upgrade() {
                StorageManager { inner }.scheduled_sync("debounced").await;
            }
        });
    }

    async fn scheduled_sync(&self, trigger: &'static str) {
        match self.sync().await {
            Ok(result) if !result.success => {
                warn!(trigger, errors = ?result.errors, "Scheduled sync finished with errors")
            }
            Ok(_) => {}
            Err(StorageError::SyncInProgress) => {
                debug!(trigger, "Scheduled sync skipped, a pass is already running")
            }
            Err(e) => warn!(trigger, error = %e, "Scheduled sync failed"),
        }
    }

    fn stop_schedules(&self) {
        self.inner.debouncer.cancel();
        self.inner.periodic.stop();
    }
}

/// The subset of provided adapters a configuration uses.
fn select(config: &StorageConfig, provided: &AdapterSet) -> AdapterSet {
    let adapters = AdapterSet {
        local: provided.local.clone().filter(|_| config.uses(AdapterKind::Local)),
        cloud: provided.cloud.clone().filter(|_| config.uses(AdapterKind::Cloud)),
    };
    if config.mode == StorageMode::Hybrid {
        adapters.link();
    }
    adapters
}

// =============================================================================
// Record Operations
// =============================================================================

#[async_trait]
impl RecordOps for StorageManager {
    async fn create(&self, model: &str, data: Fields) -> StorageResult<Record> {
        let adapter = self.primary()?;
        let record = adapter.create(model, data).await?;
        self.after_write(adapter.kind());
        Ok(record)
    }

    async fn find_many(&self, model: &str, query: &Query) -> StorageResult<Vec<Record>> {
        self.primary()?.find_many(model, query).await
    }

    async fn find_unique(&self, model: &str, query: &Query) -> StorageResult<Option<Record>> {
        self.primary()?.find_unique(model, query).await
    }

    async fn update(&self, model: &str, mutation: &Mutation) -> StorageResult<Record> {
        let adapter = self.primary()?;
        let record = adapter.update(model, mutation).await?;
        self.after_write(adapter.kind());
        Ok(record)
    }

    async fn delete(&self, model: &str, query: &Query) -> StorageResult<Record> {
        let adapter = self.primary()?;
        let record = adapter.delete(model, query).await?;
        self.after_write(adapter.kind());
        Ok(record)
    }

    async fn create_many(&self, model: &str, batch: Vec<Fields>) -> StorageResult<u64> {
        let adapter = self.primary()?;
        let count = adapter.create_many(model, batch).await?;
        self.after_write(adapter.kind());
        Ok(count)
    }

    async fn update_many(&self, model: &str, mutation: &Mutation) -> StorageResult<u64> {
        let adapter = self.primary()?;
        let count = adapter.update_many(model, mutation).await?;
        self.after_write(adapter.kind());
        Ok(count)
    }

    async fn delete_many(&self, model: &str, query: &Query) -> StorageResult<u64> {
        let adapter = self.primary()?;
        let count = adapter.delete_many(model, query).await?;
        self.after_write(adapter.kind());
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CloudStorageOptions, StorageOptions};
    use serde_json::json;
    use strata_db::MemoryStore;

    fn data(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    fn sync_options() -> StorageOptions {
        StorageOptions {
            sync_enabled: true,
            auto_sync: false,
            ..Default::default()
        }
    }

    fn hybrid(config: StorageConfig) -> (StorageManager, Arc<MemoryStore>, Arc<MemoryStore>) {
        let local_store = Arc::new(MemoryStore::new("local"));
        let cloud_store = Arc::new(MemoryStore::new("cloud"));
        let local = LocalAdapter::with_store(sync_options(), local_store.clone());
        let cloud = CloudAdapter::with_store(
            CloudStorageOptions {
                base: sync_options(),
                retry_attempts: 1,
                ..Default::default()
            },
            cloud_store.clone(),
        );
        let manager = StorageManager::with_adapters(config, Some(local), Some(cloud));
        (manager, local_store, cloud_store)
    }

    fn manual_hybrid() -> StorageConfig {
        let mut config = StorageConfig::new(StorageMode::Hybrid);
        config.hybrid.sync_strategy = SyncStrategy::Manual;
        config
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = StorageConfig::new(StorageMode::Hybrid);
        config.local.enabled = false;
        config.cloud.enabled = false;

        let err = StorageManager::new(config).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_build_marks_hybrid_adapters_for_sync() {
        let mut config = manual_hybrid();
        config.local.options.connection_string = Some("memory:local".into());
        config.cloud.options.base.connection_string = Some("memory:cloud".into());

        let adapters = build_adapters(&config).unwrap();
        let local = adapters.local.unwrap();
        let cloud = adapters.cloud.unwrap();

        assert!(local.options().sync_enabled);
        assert!(!local.options().auto_sync);
        assert!(cloud.options().sync_enabled);
    }

    #[test]
    fn test_single_mode_builds_one_adapter() {
        let mut config = StorageConfig::local_only();
        config.local.options.connection_string = Some("memory:solo".into());

        let adapters = build_adapters(&config).unwrap();
        assert!(adapters.local.is_some());
        assert!(adapters.cloud.is_none());
        assert!(!adapters.local.unwrap().options().sync_enabled);
    }

    #[tokio::test]
    async fn test_primary_returns_to_preferred_after_reconnect() {
        let mut config = manual_hybrid();
        config.hybrid.primary_storage = AdapterKind::Cloud;
        let (manager, _, _) = hybrid(config);
        manager.connect().await.unwrap();
        assert_eq!(manager.primary().unwrap().kind(), AdapterKind::Cloud);

        manager.cloud().unwrap().disconnect().await.unwrap();
        assert_eq!(manager.primary().unwrap().kind(), AdapterKind::Local);

        manager.cloud().unwrap().connect().await.unwrap();
        assert_eq!(manager.primary().unwrap().kind(), AdapterKind::Cloud);
    }

    #[tokio::test]
    async fn test_single_mode_without_adapter_is_unavailable() {
        let manager = StorageManager::with_adapters(StorageConfig::new(StorageMode::Cloud), None, None);

        let err = manager.find_many("user", &Query::all()).await.unwrap_err();
        assert!(matches!(err, StorageError::AdapterUnavailable(AdapterKind::Cloud)));
    }

    #[tokio::test]
    async fn test_sync_outside_hybrid_mode_is_refused() {
        let local = LocalAdapter::with_store(StorageOptions::default(), Arc::new(MemoryStore::new("l")));
        let manager =
            StorageManager::with_adapters(StorageConfig::new(StorageMode::Local), Some(local), None);

        let err = manager.sync().await.unwrap_err();
        assert_eq!(err.to_string(), "Sync is only available in hybrid mode");
    }

    #[tokio::test]
    async fn test_sync_requires_both_adapters() {
        let local = LocalAdapter::with_store(sync_options(), Arc::new(MemoryStore::new("l")));
        let manager = StorageManager::with_adapters(manual_hybrid(), Some(local), None);
        manager.connect().await.unwrap();

        let err = manager.sync().await.unwrap_err();
        assert!(err.to_string().contains("Both local and cloud"));
        assert!(!manager.is_syncing());
    }

    #[tokio::test]
    async fn test_offline_mode_off_makes_cloud_failure_fatal() {
        let mut config = manual_hybrid();
        config.hybrid.offline_mode = false;
        let (manager, _, cloud_store) = hybrid(config);
        cloud_store.set_reachable(false);

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, StorageError::ConnectFailed { adapter: AdapterKind::Cloud, .. }));
    }

    #[tokio::test]
    async fn test_local_only_transaction_in_hybrid_schedules_nothing_when_manual() {
        let (manager, _, _) = hybrid(manual_hybrid());
        manager.connect().await.unwrap();

        let created = manager
            .transaction(|tx| {
                Box::pin(async move {
                    let a = tx.create("user", data(json!({ "email": "a@x.com" }))).await?;
                    tx.create("chatSession", data(json!({ "userId": a.id() }))).await?;
                    Ok(a)
                })
            })
            .await
            .unwrap();

        assert!(created.is_pending());
        assert!(!manager.inner.debouncer.is_armed());
        assert_eq!(manager.find_many("chatSession", &Query::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_pass_is_recorded_in_status() {
        let (manager, _, _) = hybrid(manual_hybrid());
        manager.connect().await.unwrap();
        manager.create("user", data(json!({ "email": "a@x.com" }))).await.unwrap();

        let before = manager.status().await;
        assert_eq!(before.local.as_ref().unwrap().pending_records, Some(1));
        assert!(before.sync.enabled);
        assert!(before.sync.last_result.is_none());

        let result = manager.sync().await.unwrap();
        assert!(result.success, "{:?}", result.errors);

        let after = manager.status().await;
        assert_eq!(after.local.as_ref().unwrap().pending_records, Some(0));
        assert!(after.local.as_ref().unwrap().last_sync.is_some());
        assert!(after.cloud.as_ref().unwrap().healthy);
        assert_eq!(after.sync.completed_passes, 1);
        assert_eq!(after.sync.last_result, Some(result));
    }

    #[tokio::test]
    async fn test_status_swallows_lookup_failures() {
        let (manager, _, cloud_store) = hybrid(manual_hybrid());
        manager.connect().await.unwrap();
        cloud_store.set_reachable(false);

        let status = manager.status().await;
        let cloud = status.cloud.unwrap();
        assert!(cloud.last_sync.is_none());
        assert!(!cloud.healthy);

        let json = serde_json::to_value(&manager.status().await).unwrap();
        assert!(json.get("sync").unwrap().get("inProgress").is_some());
    }

    #[tokio::test]
    async fn test_switch_mode_rederives_adapters() {
        let (manager, _, _) = hybrid(manual_hybrid());
        manager.connect().await.unwrap();
        let cloud = manager.cloud().unwrap();

        manager.switch_mode(StorageMode::Local).await.unwrap();
        assert_eq!(manager.mode(), StorageMode::Local);
        assert!(manager.cloud().is_none());
        assert!(!cloud.connection_status());
        assert!(manager.local().unwrap().connection_status());

        manager.switch_mode(StorageMode::Local).await.unwrap();
        assert!(manager.sync().await.is_err());
    }

    #[tokio::test]
    async fn test_force_sync_clears_stuck_flag() {
        let (manager, _, _) = hybrid(manual_hybrid());
        manager.connect().await.unwrap();
        manager.inner.sync_in_progress.store(true, Ordering::SeqCst);

        assert!(matches!(manager.sync().await, Err(StorageError::SyncInProgress)));
        assert!(manager.force_sync().await.unwrap().success);
        assert!(!manager.is_syncing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_strategy_syncs_on_interval() {
        let mut config = StorageConfig::new(StorageMode::Hybrid);
        config.hybrid.sync_strategy = SyncStrategy::Periodic;
        config.hybrid.sync_interval_ms = 60_000;
        let (manager, _, _) = hybrid(config);
        manager.connect().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(125)).await;
        assert_eq!(manager.completed_passes(), 2);

        manager.cleanup().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(300)).await;
        assert_eq!(manager.completed_passes(), 2);
    }
}
