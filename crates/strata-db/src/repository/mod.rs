//! # Repository Module
//!
//! Record operations shared by every engine.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Adapter (local / cloud)                                               │
//! │       │                                                                 │
//! │       │  RecordRepository::new(&mut *session, store.models())          │
//! │       ▼                                                                 │
//! │  RecordRepository                                                      │
//! │  ├── create / create_many          id assignment, unique checks        │
//! │  ├── find_many / find_unique       filter, order, paging               │
//! │  ├── update / update_many          patch, unique checks                │
//! │  ├── delete / delete_many                                              │
//! │  └── upsert                        replica writes                      │
//! │       │                                                                 │
//! │       │  load / save / remove                                          │
//! │       ▼                                                                 │
//! │  StoreSession (SQLite transaction or in-memory working copy)           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`RecordRepository`] - Model-generic CRUD over a store session
//! - [`SyncStatusRepository`] - Last-sync bookkeeping for the SQLite engine

pub mod record;
pub mod sync;

pub use record::RecordRepository;
pub use sync::SyncStatusRepository;
