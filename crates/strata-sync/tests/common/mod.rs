//! Fixtures shared by the integration tests: in-process stores wired into
//! adapters and managers.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;
use strata_db::MemoryStore;
use strata_sync::{
    CloudAdapter, CloudStorageOptions, Fields, LocalAdapter, StorageConfig, StorageManager,
    StorageMode, StorageOptions, SyncStrategy,
};

pub fn data(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

pub fn sync_options() -> StorageOptions {
    StorageOptions {
        sync_enabled: true,
        auto_sync: false,
        ..Default::default()
    }
}

pub fn cloud_options(retry_attempts: u32) -> CloudStorageOptions {
    CloudStorageOptions {
        base: sync_options(),
        retry_attempts,
        retry_delay_ms: 1_000,
        ..Default::default()
    }
}

pub fn hybrid_config(strategy: SyncStrategy) -> StorageConfig {
    let mut config = StorageConfig::new(StorageMode::Hybrid);
    config.hybrid.sync_strategy = strategy;
    config
}

/// A hybrid manager over two fresh memory stores.
pub struct Hybrid {
    pub manager: StorageManager,
    pub local_store: Arc<MemoryStore>,
    pub cloud_store: Arc<MemoryStore>,
}

impl Hybrid {
    pub fn new(config: StorageConfig, retry_attempts: u32) -> Self {
        let local_store = Arc::new(MemoryStore::new("local"));
        let cloud_store = Arc::new(MemoryStore::new("cloud"));

        let local = LocalAdapter::with_store(sync_options(), local_store.clone());
        let cloud = CloudAdapter::with_store(cloud_options(retry_attempts), cloud_store.clone());
        let manager = StorageManager::with_adapters(config, Some(local), Some(cloud));

        Hybrid {
            manager,
            local_store,
            cloud_store,
        }
    }

    pub fn local(&self) -> LocalAdapter {
        self.manager.local().expect("local adapter")
    }

    pub fn cloud(&self) -> CloudAdapter {
        self.manager.cloud().expect("cloud adapter")
    }
}
