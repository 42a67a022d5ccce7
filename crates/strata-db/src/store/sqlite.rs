//! # SQLite Engine
//!
//! Stores every model in one `records` table as JSON documents keyed by
//! `(model, id)`. The pool is created on [`RecordStore::open`] and dropped
//! on [`RecordStore::close`], so a store value can be reopened.
//!
//! ## Layout
//! ```text
//! records                                   sync_status
//! ┌────────┬──────┬──────────────┬────────┐ ┌────┬──────────────┬──────────┐
//! │ model  │ id   │ data (JSON)  │ upd_at │ │ id │ adapter_type │ last_... │
//! ├────────┼──────┼──────────────┼────────┤ ├────┼──────────────┼──────────┤
//! │ user   │ 3f2a │ {"email":..} │ 2026.. │ │ 1  │ local        │ 2026..   │
//! │ topic  │ 91bc │ {"title":..} │ 2026.. │ │ 2  │ cloud        │ 2026..   │
//! └────────┴──────┴──────────────┴────────┘ └────┴──────────────┴──────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::{Sqlite, SqlitePool, Transaction};
use strata_core::{fields, Record};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::models::ModelRegistry;
use crate::pool::{self, DbConfig};
use crate::repository::SyncStatusRepository;
use crate::store::{RecordStore, StoreBackend, StoreSession};

/// SQLite-backed record store.
#[derive(Debug)]
pub struct SqliteStore {
    config: DbConfig,
    models: ModelRegistry,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteStore {
    /// Creates a closed store with the default models.
    pub fn new(config: DbConfig) -> Self {
        Self::with_models(config, ModelRegistry::default())
    }

    /// Creates a closed store with an explicit model registry.
    pub fn with_models(config: DbConfig, models: ModelRegistry) -> Self {
        SqliteStore {
            config,
            models,
            pool: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    fn pool(&self) -> DbResult<SqlitePool> {
        self.pool.read().clone().ok_or(DbError::Closed)
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }

    fn models(&self) -> &ModelRegistry {
        &self.models
    }

    async fn open(&self) -> DbResult<()> {
        if self.is_open() {
            return Ok(());
        }

        let pool = pool::connect(&self.config).await?;
        if self.config.run_migrations {
            migrations::run_migrations(&pool).await?;
        }

        // Another caller may have opened concurrently; keep the first pool.
        let mut slot = self.pool.write();
        if slot.is_none() {
            *slot = Some(pool);
        }
        Ok(())
    }

    async fn close(&self) {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            info!("Closing database connection pool");
            pool.close().await;
        }
    }

    fn is_open(&self) -> bool {
        self.pool.read().is_some()
    }

    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool()?).await?;
        Ok(())
    }

    /// Sessions take the write lock up front. A deferred `BEGIN` that
    /// reads first cannot upgrade while another session holds the lock,
    /// and fails with `database is locked` instead of waiting.
    async fn begin(&self) -> DbResult<Box<dyn StoreSession>> {
        let tx = self.pool()?.begin_with("BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqliteSession { tx }))
    }

    async fn last_sync_time(&self, scope: &str) -> DbResult<Option<DateTime<Utc>>> {
        SyncStatusRepository::new(self.pool()?).latest(scope).await
    }

    async fn record_sync_time(&self, scope: &str, at: DateTime<Utc>) -> DbResult<()> {
        SyncStatusRepository::new(self.pool()?).record(scope, at).await
    }
}

// =============================================================================
// Session
// =============================================================================

/// One SQLite transaction.
struct SqliteSession {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreSession for SqliteSession {
    async fn load(&mut self, model: &str) -> DbResult<Vec<Record>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT data FROM records WHERE model = ?1 ORDER BY rowid")
                .bind(model)
                .fetch_all(&mut *self.tx)
                .await?;

        rows.iter()
            .map(|data| serde_json::from_str::<Record>(data).map_err(DbError::from))
            .collect()
    }

    async fn save(&mut self, model: &str, record: &Record) -> DbResult<()> {
        let id = record
            .id()
            .ok_or_else(|| DbError::Internal(format!("{model} record has no id")))?;
        let data = serde_json::to_string(record)?;
        let updated_at = record
            .get(fields::UPDATED_AT)
            .and_then(|v| v.as_str())
            .map(str::to_string);

        sqlx::query(
            r#"
            INSERT INTO records (model, id, data, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (model, id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(model)
        .bind(id)
        .bind(&data)
        .bind(updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn remove(&mut self, model: &str, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM records WHERE model = ?1 AND id = ?2")
            .bind(model)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RecordRepository;
    use serde_json::json;
    use strata_core::Query;
    use tempfile::TempDir;

    fn user(email: &str) -> strata_core::Fields {
        json!({ "email": email }).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_open_is_idempotent_and_close_reopens() {
        let store = SqliteStore::new(DbConfig::in_memory());

        store.open().await.unwrap();
        store.open().await.unwrap();
        assert!(store.ping().await.is_ok());

        store.close().await;
        store.close().await;
        assert!(!store.is_open());
        assert!(matches!(store.ping().await, Err(DbError::Closed)));
    }

    #[tokio::test]
    async fn test_commit_persists_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("strata.db");

        let store = SqliteStore::new(DbConfig::new(&path));
        store.open().await.unwrap();

        let mut session = store.begin().await.unwrap();
        RecordRepository::new(&mut *session, store.models())
            .create("user", user("a@x.com"))
            .await
            .unwrap();
        session.commit().await.unwrap();
        store.close().await;

        let reopened = SqliteStore::new(DbConfig::new(&path));
        reopened.open().await.unwrap();
        let mut session = reopened.begin().await.unwrap();
        let users = RecordRepository::new(&mut *session, reopened.models())
            .find_many("user", &Query::all())
            .await
            .unwrap();

        assert_eq!(users.len(), 1);
        assert_eq!(users[0].get("email"), Some(&json!("a@x.com")));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = SqliteStore::new(DbConfig::in_memory());
        store.open().await.unwrap();

        let mut session = store.begin().await.unwrap();
        RecordRepository::new(&mut *session, store.models())
            .create("user", user("gone@x.com"))
            .await
            .unwrap();
        session.rollback().await.unwrap();

        let mut session = store.begin().await.unwrap();
        let users = RecordRepository::new(&mut *session, store.models())
            .find_many("user", &Query::all())
            .await
            .unwrap();
        assert!(users.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_write_sessions_all_commit() {
        let dir = TempDir::new().unwrap();
        let config = DbConfig::new(dir.path().join("busy.db"));
        let store = std::sync::Arc::new(SqliteStore::new(config));
        store.open().await.unwrap();

        let writers: Vec<_> = (0..20)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut session = store.begin().await?;
                    RecordRepository::new(&mut *session, store.models())
                        .create("user", user(&format!("u{n}@x.com")))
                        .await?;
                    session.commit().await
                })
            })
            .collect();

        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let mut session = store.begin().await.unwrap();
        let users = RecordRepository::new(&mut *session, store.models())
            .find_many("user", &Query::all())
            .await
            .unwrap();
        assert_eq!(users.len(), 20);
    }

    #[tokio::test]
    async fn test_sync_time_round_trip() {
        let store = SqliteStore::new(DbConfig::in_memory());
        store.open().await.unwrap();

        let at = Utc::now();
        store.record_sync_time("local", at).await.unwrap();

        assert_eq!(store.last_sync_time("local").await.unwrap(), Some(at));
        assert_eq!(store.last_sync_time("cloud").await.unwrap(), None);
    }
}
