//! # strata-sync: Storage Adapters and Manager
//!
//! Decides where each record goes (local store, cloud store, or both) and
//! reconciles the two stores when both are in play.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Strata Data Flow                                 │
//! │                                                                         │
//! │  Application code                                                      │
//! │       │  create / find_many / update / delete / transaction            │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   strata-sync (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   StorageManager ── primary() ──┬──► LocalAdapter              │   │
//! │  │        │                        └──► CloudAdapter (retry)      │   │
//! │  │        │                                                        │   │
//! │  │        └── sync(): LocalAdapter pushes pending ──► cloud store  │   │
//! │  │                    CloudAdapter pulls changed  ──► local store  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  strata-db RecordStore engines                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`manager`] - `StorageManager`: modes, fallback, sync scheduling, status
//! - [`adapter`] - `RecordOps` / `StorageAdapter` traits and `AnyAdapter`
//! - [`local`] - Local adapter: pending-marker bookkeeping and push
//! - [`cloud`] - Cloud adapter: retry, reconnect, pull
//! - [`transaction`] - Transaction handle and write stamping
//! - [`config`] - TOML configuration, profiles and presets
//! - [`scheduler`] - Debounce and periodic timers
//! - [`error`] - Storage error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_sync::{RecordOps, StorageConfig, StorageManager};
//!
//! let manager = StorageManager::new(StorageConfig::load(None)?)?;
//! manager.connect().await?;
//!
//! let user = manager.create("user", fields).await?;
//! println!("{}", serde_json::to_string_pretty(&manager.status().await)?);
//!
//! manager.cleanup().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod adapter;
pub mod cloud;
pub mod config;
pub mod error;
pub mod local;
pub mod manager;
pub mod scheduler;
pub mod transaction;

mod replica;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use adapter::{AnyAdapter, RecordOps, StorageAdapter};
pub use cloud::{CloudAdapter, ConnectionInfo};
pub use config::{
    CloudProvider, CloudSettings, CloudStorageOptions, DataPrivacy, HybridSettings,
    LocalSettings, Profile, StorageConfig, StorageMode, StorageOptions, SyncFrequency,
    SyncStrategy, UserPreferences,
};
pub use error::{StorageError, StorageResult};
pub use local::LocalAdapter;
pub use manager::{CloudStatus, LocalStatus, StorageManager, StorageStatus, SyncState};
pub use transaction::{Transaction, WriteStamp};

// The record model callers build queries and payloads with.
pub use strata_core::{
    fields, AdapterKind, BestEffort, ConflictResolution, Fields, Mutation, Query, Record,
    SortDirection, SyncResult, SyncStatus,
};
