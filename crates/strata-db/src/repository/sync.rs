//! # Sync Status Repository
//!
//! Persists each adapter's "last sync time" for the SQLite engine.
//!
//! ## Bookkeeping Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    sync_status (append-only log)                        │
//! │                                                                         │
//! │   id │ adapter_type │ last_sync_time                                    │
//! │  ────┼──────────────┼──────────────────────────────                     │
//! │   1  │ local        │ 2026-10-19T08:00:00.000000000Z                    │
//! │   2  │ cloud        │ 2026-10-19T08:00:00.120000000Z                    │
//! │   3  │ local        │ 2026-10-19T08:05:00.000000000Z  ◄── latest local  │
//! │                                                                         │
//! │  record(scope, t) appends a row; latest(scope) reads the newest one.   │
//! │  prune(scope, keep) trims history so the log stays bounded.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use strata_core::record::parse_timestamp;
use tracing::debug;

use crate::error::DbResult;

/// Rows kept per adapter type after each write.
pub const HISTORY_LIMIT: i64 = 100;

/// Repository for last-sync bookkeeping.
#[derive(Debug, Clone)]
pub struct SyncStatusRepository {
    pool: SqlitePool,
}

impl SyncStatusRepository {
    /// Creates a new SyncStatusRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncStatusRepository { pool }
    }

    /// Returns the most recent sync time recorded for `scope`.
    pub async fn latest(&self, scope: &str) -> DbResult<Option<DateTime<Utc>>> {
        let raw: Option<String> = sqlx::query_scalar(
            r#"
            SELECT last_sync_time
            FROM sync_status
            WHERE adapter_type = ?1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;

        match raw {
            Some(text) => Ok(Some(parse_timestamp(
                "last_sync_time",
                &serde_json::Value::String(text),
            )?)),
            None => Ok(None),
        }
    }

    /// Appends a sync time for `scope`, then trims old rows.
    pub async fn record(&self, scope: &str, at: DateTime<Utc>) -> DbResult<()> {
        let stamp = at.to_rfc3339_opts(SecondsFormat::Nanos, true);

        debug!(scope = %scope, at = %at, "Recording sync time");

        sqlx::query(
            r#"
            INSERT INTO sync_status (adapter_type, last_sync_time)
            VALUES (?1, ?2)
            "#,
        )
        .bind(scope)
        .bind(&stamp)
        .execute(&self.pool)
        .await?;

        self.prune(scope, HISTORY_LIMIT).await?;
        Ok(())
    }

    /// Deletes all but the newest `keep` rows for `scope`.
    ///
    /// ## Returns
    /// Number of deleted rows.
    pub async fn prune(&self, scope: &str, keep: i64) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_status
            WHERE adapter_type = ?1
            AND id NOT IN (
                SELECT id FROM sync_status
                WHERE adapter_type = ?1
                ORDER BY id DESC
                LIMIT ?2
            )
            "#,
        )
        .bind(scope)
        .bind(keep)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use crate::pool::{connect, DbConfig};
    use chrono::Duration;

    async fn repo() -> SyncStatusRepository {
        let pool = connect(&DbConfig::in_memory()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SyncStatusRepository::new(pool)
    }

    #[tokio::test]
    async fn test_latest_is_scoped_per_adapter() {
        let repo = repo().await;
        let t0 = Utc::now();

        assert_eq!(repo.latest("local").await.unwrap(), None);

        repo.record("local", t0).await.unwrap();
        repo.record("cloud", t0 + Duration::seconds(5)).await.unwrap();
        repo.record("local", t0 + Duration::seconds(10)).await.unwrap();

        assert_eq!(repo.latest("local").await.unwrap(), Some(t0 + Duration::seconds(10)));
        assert_eq!(repo.latest("cloud").await.unwrap(), Some(t0 + Duration::seconds(5)));
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let repo = repo().await;
        let t0 = Utc::now();

        for i in 0..5 {
            repo.record("local", t0 + Duration::seconds(i)).await.unwrap();
        }

        assert_eq!(repo.prune("local", 2).await.unwrap(), 3);
        assert_eq!(repo.latest("local").await.unwrap(), Some(t0 + Duration::seconds(4)));
    }
}
