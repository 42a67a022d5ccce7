//! # Record Store Engines
//!
//! The physical backends adapters run on. Every engine exposes the same
//! two traits: a [`RecordStore`] that owns connectivity and sync
//! bookkeeping, and a [`StoreSession`] that reads and writes one model's
//! documents inside a transaction.
//!
//! ## Engine Selection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    open_store(connection_string)                        │
//! │                                                                         │
//! │  "sqlite:./app.db"   ─┐                                                │
//! │  "file:./dev.db"     ─┼──► SqliteStore   (sqlx pool, WAL, migrations)  │
//! │  "sqlite::memory:"   ─┘                                                │
//! │                                                                         │
//! │  "memory:<name>"     ────► MemoryStore   (in-process, fault injection) │
//! │                                                                         │
//! │  anything else       ────► DbError::UnsupportedBackend                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Session Lifecycle
//! ```text
//! begin() ──► load / save / remove ... ──► commit()    writes become visible
//!                                     └──► rollback()  writes discarded
//!                                     └──► drop        writes discarded
//! ```

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strata_core::Record;

use crate::error::{DbError, DbResult};
use crate::models::ModelRegistry;
use crate::pool::DbConfig;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Which engine a store runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Sqlite => f.write_str("sqlite"),
            StoreBackend::Memory => f.write_str("memory"),
        }
    }
}

// =============================================================================
// Traits
// =============================================================================

/// A physical record store.
#[async_trait]
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    fn backend(&self) -> StoreBackend;

    /// Models this store accepts.
    fn models(&self) -> &ModelRegistry;

    /// Connects. Opening an open store is a no-op.
    async fn open(&self) -> DbResult<()>;

    /// Disconnects. Closing a closed store is a no-op.
    async fn close(&self);

    fn is_open(&self) -> bool;

    /// Lightweight liveness probe against the backend itself.
    async fn ping(&self) -> DbResult<()>;

    /// Starts a transaction.
    async fn begin(&self) -> DbResult<Box<dyn StoreSession>>;

    /// Most recent sync time recorded under `scope` (the adapter type).
    async fn last_sync_time(&self, scope: &str) -> DbResult<Option<DateTime<Utc>>>;

    /// Records a completed sync pass under `scope`.
    async fn record_sync_time(&self, scope: &str, at: DateTime<Utc>) -> DbResult<()>;
}

/// Transaction-scoped access to stored documents.
///
/// Sessions see their own uncommitted writes. Model names are validated
/// by the record operations in [`crate::repository`], not here.
#[async_trait]
pub trait StoreSession: Send {
    /// All documents of a model, in insertion order.
    async fn load(&mut self, model: &str) -> DbResult<Vec<Record>>;

    /// Inserts or replaces a document by id.
    async fn save(&mut self, model: &str, record: &Record) -> DbResult<()>;

    /// Deletes a document. Returns whether it existed.
    async fn remove(&mut self, model: &str, id: &str) -> DbResult<bool>;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

// =============================================================================
// Engine Selection
// =============================================================================

/// Builds the engine for a connection string with the default models.
///
/// The store is returned closed; call [`RecordStore::open`] to connect.
pub fn open_store(connection_string: &str, pool_size: u32) -> DbResult<Arc<dyn RecordStore>> {
    open_store_with(connection_string, pool_size, ModelRegistry::default())
}

/// Builds the engine for a connection string with an explicit registry.
pub fn open_store_with(
    connection_string: &str,
    pool_size: u32,
    models: ModelRegistry,
) -> DbResult<Arc<dyn RecordStore>> {
    let url = connection_string.trim();

    if let Some(name) = url.strip_prefix("memory:") {
        let name = name.trim_start_matches("//");
        return Ok(Arc::new(MemoryStore::with_models(name, models)));
    }

    if url.starts_with("sqlite:") || url.starts_with("file:") {
        let config = DbConfig::from_url(url)?.max_connections(pool_size);
        return Ok(Arc::new(SqliteStore::with_models(config, models)));
    }

    let scheme = url.split(':').next().unwrap_or(url);
    Err(DbError::UnsupportedBackend(format!(
        "no engine for '{scheme}' connection strings"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_selection() {
        assert_eq!(
            open_store("memory:cloud", 5).unwrap().backend(),
            StoreBackend::Memory
        );
        assert_eq!(
            open_store("sqlite::memory:", 5).unwrap().backend(),
            StoreBackend::Sqlite
        );
        assert_eq!(
            open_store("file:./dev.db", 5).unwrap().backend(),
            StoreBackend::Sqlite
        );
    }

    #[test]
    fn test_unknown_scheme_is_unsupported() {
        let err = open_store("postgresql://user@db.example.com/app", 5).unwrap_err();
        assert!(matches!(err, DbError::UnsupportedBackend(msg) if msg.contains("postgresql")));
    }

    #[test]
    fn test_stores_start_closed() {
        assert!(!open_store("memory:x", 1).unwrap().is_open());
    }
}
