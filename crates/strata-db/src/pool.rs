//! # Database Pool Management
//!
//! Connection pool creation and configuration for the SQLite engine.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  "sqlite:./data/strata.db"                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbConfig::from_url(url) ← Parse path, configure pool settings         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SqliteStore::open() ──► connect(&config).await ──► run migrations     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │                           │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │  (max_connections)        │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! File databases run in WAL mode so readers never block the single writer.
//! In-memory databases are pinned to one connection that is never reaped,
//! since every SQLite connection to `:memory:` is its own database.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};

const MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// SQLite pool configuration.
///
/// ## Example
/// ```rust
/// use strata_db::DbConfig;
///
/// let config = DbConfig::from_url("sqlite:./data/strata.db")
///     .unwrap()
///     .max_connections(10);
/// assert_eq!(config.max_connections, 10);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file, or `:memory:`.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection. `None` keeps connections.
    /// Default: 10 minutes
    pub idle_timeout: Option<Duration>,

    /// Whether to run migrations on open.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a configuration for a database file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            run_migrations: true,
        }
    }

    /// Creates an in-memory database configuration (for testing).
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(MEMORY_PATH),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            run_migrations: true,
        }
    }

    /// Parses a connection string.
    ///
    /// Accepts `sqlite:<path>`, `sqlite://<path>`, `file:<path>` and
    /// `sqlite::memory:`. Query parameters are ignored.
    pub fn from_url(url: &str) -> DbResult<Self> {
        let rest = ["sqlite://", "sqlite:", "file://", "file:"]
            .iter()
            .find_map(|prefix| url.strip_prefix(prefix))
            .ok_or_else(|| DbError::UnsupportedBackend(url.to_string()))?;

        let path = rest.split('?').next().unwrap_or_default();
        if path.is_empty() {
            return Err(DbError::ConnectionFailed(format!(
                "no database path in '{url}'"
            )));
        }

        if path == MEMORY_PATH {
            Ok(Self::in_memory())
        } else {
            Ok(Self::new(path))
        }
    }

    /// Sets the maximum number of connections. Ignored for in-memory databases.
    pub fn max_connections(mut self, max: u32) -> Self {
        if !self.is_in_memory() {
            self.max_connections = max.max(1);
        }
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on open.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == MEMORY_PATH
    }
}

// =============================================================================
// Pool Creation
// =============================================================================

/// Creates the connection pool.
///
/// ## What This Does
/// 1. Creates the database file (and parent directory) if missing
/// 2. Configures SQLite:
///    - WAL mode for concurrent reads (file databases)
///    - NORMAL synchronous (balance of safety/speed)
///    - Foreign keys enabled
/// 3. Creates the connection pool
pub async fn connect(config: &DbConfig) -> DbResult<SqlitePool> {
    info!(
        path = %config.database_path.display(),
        "Initializing database connection"
    );

    let base_options = if config.is_in_memory() {
        SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
    } else {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
            }
        }
        SqliteConnectOptions::new()
            .filename(&config.database_path)
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true)
    };

    let connect_options = base_options
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    debug!("Connection options configured");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(if config.is_in_memory() {
            None
        } else {
            Some(Duration::from_secs(30 * 60))
        })
        .connect_with(connect_options)
        .await
        .map_err(|e| match DbError::from(e) {
            err @ DbError::Network(_) => err,
            other => DbError::ConnectionFailed(other.to_string()),
        })?;

    info!(
        max_connections = config.max_connections,
        "Database pool created"
    );

    Ok(pool)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url_variants() {
        let file = DbConfig::from_url("sqlite:./data/app.db").unwrap();
        assert_eq!(file.database_path, PathBuf::from("./data/app.db"));

        let slashes = DbConfig::from_url("sqlite://data.db?mode=rwc").unwrap();
        assert_eq!(slashes.database_path, PathBuf::from("data.db"));

        let prisma_style = DbConfig::from_url("file:./dev.db").unwrap();
        assert_eq!(prisma_style.database_path, PathBuf::from("./dev.db"));

        assert!(DbConfig::from_url("sqlite::memory:").unwrap().is_in_memory());
    }

    #[test]
    fn test_from_url_rejects_other_schemes() {
        let err = DbConfig::from_url("postgres://db.example.com/app").unwrap_err();
        assert!(matches!(err, DbError::UnsupportedBackend(_)));
    }

    #[test]
    fn test_in_memory_stays_single_connection() {
        let config = DbConfig::in_memory().max_connections(8);
        assert_eq!(config.max_connections, 1);
    }

    #[tokio::test]
    async fn test_in_memory_pool_answers() {
        let pool = connect(&DbConfig::in_memory()).await.unwrap();
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(one, 1);
    }
}
