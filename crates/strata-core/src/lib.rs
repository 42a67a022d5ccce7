//! # strata-core: Pure Types for the Storage Engine
//!
//! This crate contains the I/O-free building blocks shared by the record
//! store engines (`strata-db`) and the adapters/manager (`strata-sync`).
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Strata Data Flow                                 │
//! │                                                                         │
//! │  Caller ──► StorageManager ──► Local/Cloud Adapter ──► RecordStore     │
//! │                  │                     │                     │          │
//! │                  └─────────────────────┴─────────────────────┘          │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 strata-core (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   Record / Fields      Query / Mutation      SyncResult         │   │
//! │  │   (JSON documents)     (filters, paging)     ConflictResolution │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use strata_core::{Query, Record};
//!
//! let record = Record::from_value(json!({ "id": "u1", "email": "a@x.com" })).unwrap();
//! let query = Query::new().filter("email", json!("a@x.com"));
//!
//! assert!(query.matches(&record).unwrap());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod query;
pub mod record;
pub mod sync;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::CoreError;
pub use query::{Mutation, OrderBy, Query, SortDirection};
pub use record::{fields, timestamp, Fields, Record, SyncStatus};
pub use sync::{
    resolve_conflict, AdapterKind, BestEffort, ConflictResolution, Resolution, SyncResult,
};
