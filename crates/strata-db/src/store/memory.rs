//! # In-Memory Engine
//!
//! A process-local record store. It backs the `memory:` connection scheme
//! and stands in for a remote store in tests: reachability can be toggled
//! and failures injected, while counters expose how often the store was
//! actually hit.
//!
//! ## Transactions
//! ```text
//! begin()  ──► lock tables (serializes writers) ──► clone into working copy
//! save()   ──► mutate working copy
//! commit() ──► swap working copy in, release lock
//! drop     ──► release lock, working copy discarded
//! ```
//!
//! ## Fault Injection
//! | Knob                      | Effect                                        |
//! |---------------------------|-----------------------------------------------|
//! | `set_reachable(false)`    | every call fails with a connection-refused    |
//! | `fail_next_opens(n, msg)` | next `n` opens fail with a network error      |
//! | `fail_next_operations(n)` | next `n` operations fail with `QueryFailed`   |

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use strata_core::Record;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::models::ModelRegistry;
use crate::store::{RecordStore, StoreBackend, StoreSession};

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, Vec<Record>>,
    sync_times: Vec<(String, DateTime<Utc>)>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_opens: u32,
    failing_operations: u32,
    message: String,
}

/// In-process record store.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    models: ModelRegistry,
    tables: Arc<AsyncMutex<Tables>>,
    open: AtomicBool,
    reachable: Arc<AtomicBool>,
    faults: Mutex<Faults>,
    open_attempts: AtomicU64,
    operation_attempts: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty, closed store with the default models.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_models(name, ModelRegistry::default())
    }

    /// Creates an empty, closed store with an explicit model registry.
    pub fn with_models(name: impl Into<String>, models: ModelRegistry) -> Self {
        MemoryStore {
            name: name.into(),
            models,
            tables: Arc::new(AsyncMutex::new(Tables::default())),
            open: AtomicBool::new(false),
            reachable: Arc::new(AtomicBool::new(true)),
            faults: Mutex::new(Faults::default()),
            open_attempts: AtomicU64::new(0),
            operation_attempts: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simulates the store dropping off (or coming back on) the network.
    pub fn set_reachable(&self, reachable: bool) {
        debug!(store = %self.name, reachable, "Reachability changed");
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes the next `count` opens fail with a network error.
    pub fn fail_next_opens(&self, count: u32, message: impl Into<String>) {
        let mut faults = self.faults.lock();
        faults.failing_opens = count;
        faults.message = message.into();
    }

    /// Makes the next `count` operations fail with `QueryFailed(message)`.
    pub fn fail_next_operations(&self, count: u32, message: impl Into<String>) {
        let mut faults = self.faults.lock();
        faults.failing_operations = count;
        faults.message = message.into();
    }

    /// Number of `open` calls so far.
    pub fn open_attempts(&self) -> u64 {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// Number of `ping`, `begin` and sync-time calls so far.
    pub fn operation_attempts(&self) -> u64 {
        self.operation_attempts.load(Ordering::SeqCst)
    }

    fn refused(&self) -> DbError {
        DbError::Network(format!("connect ECONNREFUSED memory:{}", self.name))
    }

    /// Counts an operation and applies injected faults.
    fn check_operation(&self) -> DbResult<()> {
        self.operation_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.refused());
        }

        {
            let mut faults = self.faults.lock();
            if faults.failing_operations > 0 {
                faults.failing_operations -= 1;
                return Err(DbError::QueryFailed(faults.message.clone()));
            }
        }

        if !self.is_open() {
            return Err(DbError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    fn models(&self) -> &ModelRegistry {
        &self.models
    }

    async fn open(&self) -> DbResult<()> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.refused());
        }

        {
            let mut faults = self.faults.lock();
            if faults.failing_opens > 0 {
                faults.failing_opens -= 1;
                return Err(DbError::Network(faults.message.clone()));
            }
        }

        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> DbResult<()> {
        self.check_operation()
    }

    async fn begin(&self) -> DbResult<Box<dyn StoreSession>> {
        self.check_operation()?;

        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemorySession {
            guard,
            working,
            reachable: self.reachable.clone(),
            name: self.name.clone(),
        }))
    }

    async fn last_sync_time(&self, scope: &str) -> DbResult<Option<DateTime<Utc>>> {
        self.check_operation()?;

        let tables = self.tables.lock().await;
        Ok(tables
            .sync_times
            .iter()
            .rev()
            .find(|(s, _)| s == scope)
            .map(|(_, at)| *at))
    }

    async fn record_sync_time(&self, scope: &str, at: DateTime<Utc>) -> DbResult<()> {
        self.check_operation()?;

        self.tables.lock().await.sync_times.push((scope.to_string(), at));
        Ok(())
    }
}

// =============================================================================
// Session
// =============================================================================

struct MemorySession {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    reachable: Arc<AtomicBool>,
    name: String,
}

impl MemorySession {
    fn check(&self) -> DbResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DbError::Network(format!(
                "read ECONNRESET memory:{}",
                self.name
            )))
        }
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn load(&mut self, model: &str) -> DbResult<Vec<Record>> {
        self.check()?;
        Ok(self.working.rows.get(model).cloned().unwrap_or_default())
    }

    async fn save(&mut self, model: &str, record: &Record) -> DbResult<()> {
        self.check()?;
        let id = record
            .id()
            .ok_or_else(|| DbError::Internal(format!("{model} record has no id")))?;

        let rows = self.working.rows.entry(model.to_string()).or_default();
        match rows.iter_mut().find(|r| r.id() == Some(id)) {
            Some(slot) => *slot = record.clone(),
            None => rows.push(record.clone()),
        }
        Ok(())
    }

    async fn remove(&mut self, model: &str, id: &str) -> DbResult<bool> {
        self.check()?;
        let Some(rows) = self.working.rows.get_mut(model) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|r| r.id() != Some(id));
        Ok(rows.len() != before)
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.check()
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let MemorySession {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
