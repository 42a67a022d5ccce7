//! # Storage Error Types
//!
//! Error types for adapters and the storage manager.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Storage Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Connection    │  │     Operation           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  ConnectFailed  │  │  ModelNotFound          │ │
//! │  │  MissingConn... │  │  Disconnected   │  │  NotFound               │ │
//! │  │  ConfigLoad/Save│  │  Network        │  │  TransactionFailed      │ │
//! │  │                 │  │  Timeout        │  │  Backend(DbError)       │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                        Manager                                  │   │
//! │  │                                                                 │   │
//! │  │  AdapterUnavailable   NoAdapterAvailable   SyncInProgress       │   │
//! │  │  SyncUnavailable                                                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sync passes never return these: failures inside a pass land in
//! [`strata_core::SyncResult::errors`]. Only the manager's own guards
//! (`SyncInProgress`, `SyncUnavailable`) surface as errors from `sync()`.

use strata_core::AdapterKind;
use strata_db::DbError;
use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Substrings that identify a transient network failure in an error message.
const NETWORK_SIGNATURES: &[&str] = &[
    "ECONNREFUSED",
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EAI_AGAIN",
    "connection refused",
    "connection reset",
    "timed out",
];

/// Storage error type covering adapter and manager failures.
///
/// ## Design Principles
/// - Manager conditions are distinct variants callers can branch on
/// - Backend failures keep the underlying `DbError` intact
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum StorageError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid storage configuration.
    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// An adapter was built without a connection string.
    #[error("{0} adapter requires a connection string")]
    MissingConnectionString(AdapterKind),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Connection Errors
    // =========================================================================
    /// Connecting gave up after the attempt budget ran out.
    #[error("Failed to connect to {adapter} store after {attempts} attempts: {reason}")]
    ConnectFailed {
        adapter: AdapterKind,
        attempts: u32,
        reason: String,
    },

    /// The backing store is not connected.
    #[error("Storage adapter is not connected")]
    Disconnected,

    /// Transient network failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Operation timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // =========================================================================
    // Operation Errors
    // =========================================================================
    /// The model name is not known to the backing store.
    #[error("Model {0} not found")]
    ModelNotFound(String),

    /// No record matched an update/delete.
    #[error("{model} not found: {id}")]
    NotFound { model: String, id: String },

    /// A transaction could not be started, committed or completed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Any other record store failure, unchanged.
    #[error(transparent)]
    Backend(DbError),

    // =========================================================================
    // Manager Errors
    // =========================================================================
    /// The adapter the current mode needs was never constructed.
    #[error("{0} adapter not available")]
    AdapterUnavailable(AdapterKind),

    /// Neither the primary nor an allowed fallback is connected.
    #[error("No storage adapter available")]
    NoAdapterAvailable,

    /// A sync pass is already running.
    #[error("Sync already in progress")]
    SyncInProgress,

    /// Sync is not possible in the current configuration.
    #[error("{0}")]
    SyncUnavailable(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for StorageError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::ModelNotFound(model) => StorageError::ModelNotFound(model),
            DbError::NotFound { entity, id } => StorageError::NotFound { model: entity, id },
            DbError::Closed => StorageError::Disconnected,
            DbError::Network(msg) => StorageError::Network(msg),
            DbError::Timeout(msg) => StorageError::Timeout(msg),
            DbError::TransactionFailed(msg) => StorageError::TransactionFailed(msg),
            other => StorageError::Backend(other),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for StorageError {
    fn from(err: toml::de::Error) -> Self {
        StorageError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for StorageError {
    fn from(err: toml::ser::Error) -> Self {
        StorageError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl StorageError {
    /// Returns true if the failure looks like a transient network condition.
    ///
    /// The cloud adapter reconnects before retrying these. Other retryable
    /// errors are retried as-is (see [`StorageError::is_retryable`]).
    ///
    /// ## Network Errors
    /// - `Network`, `Timeout`, `Disconnected`
    /// - Backend errors the engine already classified as network
    /// - Any message carrying a known signature (ECONNREFUSED, ETIMEDOUT, ...)
    pub fn is_network_error(&self) -> bool {
        match self {
            StorageError::Network(_) | StorageError::Timeout(_) | StorageError::Disconnected => {
                true
            }
            StorageError::Backend(err) if err.is_network() => true,
            other => {
                let message = other.to_string();
                NETWORK_SIGNATURES.iter().any(|sig| message.contains(sig))
            }
        }
    }

    /// Returns true if running the same operation again could succeed.
    ///
    /// Logical failures come back the same on every attempt, so the cloud
    /// adapter hands them to the caller at once.
    ///
    /// ## Not Retried
    /// - `ModelNotFound`, `NotFound`
    /// - Unique violations and serialization failures from the backend
    /// - Configuration and manager errors
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::ModelNotFound(_) | StorageError::NotFound { .. } => false,
            StorageError::Backend(
                DbError::UniqueViolation { .. }
                | DbError::ModelNotFound(_)
                | DbError::NotFound { .. }
                | DbError::Serialization(_)
                | DbError::UnsupportedBackend(_),
            ) => false,
            other => !other.is_config_error() && !other.is_manager_error(),
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidConfig(_)
                | StorageError::MissingConnectionString(_)
                | StorageError::ConfigLoadFailed(_)
                | StorageError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if this error comes from the manager's own routing or
    /// sync guards rather than from a backend.
    pub fn is_manager_error(&self) -> bool {
        matches!(
            self,
            StorageError::AdapterUnavailable(_)
                | StorageError::NoAdapterAvailable
                | StorageError::SyncInProgress
                | StorageError::SyncUnavailable(_)
        )
    }
}
