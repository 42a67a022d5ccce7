//! # strata-db: Record Store Engines
//!
//! The physical stores the storage adapters sit on. Each engine accepts
//! JSON record documents grouped by model name and offers transactions and
//! last-sync bookkeeping through one pair of traits.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Strata Data Flow                                 │
//! │                                                                         │
//! │  LocalAdapter / CloudAdapter (strata-sync)                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     strata-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  RecordStore  │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │  (store/)     │    │ (repository/) │    │  (embedded)  │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ SqliteStore   │◄───│ RecordRepo    │    │ 001_records  │  │   │
//! │  │   │ MemoryStore   │    │ SyncStatusRepo│    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file / process memory                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - `RecordStore` / `StoreSession` traits and the engines
//! - [`repository`] - Model-generic CRUD and sync bookkeeping
//! - [`models`] - Registered model names and unique fields
//! - [`pool`] - SQLite pool configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_db::{open_store, RecordRepository};
//!
//! let store = open_store("sqlite:./data/strata.db", 5)?;
//! store.open().await?;
//!
//! let mut session = store.begin().await?;
//! let user = RecordRepository::new(&mut *session, store.models())
//!     .create("user", fields)
//!     .await?;
//! session.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use models::{ModelRegistry, ModelSpec};
pub use pool::DbConfig;
pub use store::{
    open_store, open_store_with, MemoryStore, RecordStore, SqliteStore, StoreBackend, StoreSession,
};

// Repository re-exports for convenience
pub use repository::record::RecordRepository;
pub use repository::sync::SyncStatusRepository;
