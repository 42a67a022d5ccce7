//! # Sync Outcomes and Conflict Resolution
//!
//! ## Sync Pass Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         One Hybrid Sync Pass                            │
//! │                                                                         │
//! │   Local adapter.sync()            Cloud adapter.sync()                  │
//! │   push pending ──► cloud          pull changed ──► local                │
//! │        │                                │                               │
//! │        ▼                                ▼                               │
//! │   SyncResult (local)              SyncResult (cloud)                    │
//! │        └──────────────┬─────────────────┘                               │
//! │                       ▼                                                 │
//! │              SyncResult::merge ──► aggregate returned to the caller     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Conflicts
//! A conflict is the same record id holding different content on both
//! sides while the receiving side still has unsynchronised changes. The
//! configured [`ConflictResolution`] decides the outcome:
//!
//! | Policy   | Outcome                                                    |
//! |----------|------------------------------------------------------------|
//! | `local`  | Local copy wins                                            |
//! | `remote` | Remote copy wins                                           |
//! | `merge`  | Newer `updatedAt` overlays the older copy; ties favour local |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::Record;

// =============================================================================
// Adapter Kind
// =============================================================================

/// Which physical backend an adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Local,
    Cloud,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Local => "local",
            AdapterKind::Cloud => "cloud",
        }
    }

    /// The other backend.
    pub fn other(&self) -> AdapterKind {
        match self {
            AdapterKind::Local => AdapterKind::Cloud,
            AdapterKind::Cloud => AdapterKind::Local,
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sync Result
// =============================================================================

/// Outcome of one sync pass.
///
/// `success` is derived from `errors` by every constructor, so a failed
/// result always explains itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub conflicts_resolved: u64,
    pub records_synced: u64,
    pub last_sync_time: DateTime<Utc>,
    pub errors: Vec<String>,
}

impl SyncResult {
    /// A successful, empty pass completed at `at`.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            conflicts_resolved: 0,
            records_synced: 0,
            last_sync_time: at,
            errors: Vec::new(),
        }
    }

    /// A pass that failed outright.
    pub fn failed(at: DateTime<Utc>, error: impl Into<String>) -> Self {
        let mut result = Self::new(at);
        result.push_error(error);
        result
    }

    /// Records an error; the pass is no longer successful.
    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.success = false;
    }

    /// Folds another pass into this one. The later completion time wins.
    pub fn merge(&mut self, other: SyncResult) {
        self.records_synced += other.records_synced;
        self.conflicts_resolved += other.conflicts_resolved;
        if other.last_sync_time > self.last_sync_time {
            self.last_sync_time = other.last_sync_time;
        }
        self.errors.extend(other.errors);
        self.success = self.errors.is_empty();
    }
}

// =============================================================================
// Conflict Resolution
// =============================================================================

/// Policy applied when both sides changed the same record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    #[default]
    Local,
    #[serde(alias = "cloud")]
    Remote,
    Merge,
}

/// What to store after resolving a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    KeepLocal,
    TakeRemote,
    Merged(Record),
}

/// Decides between the local and the remote copy of one record.
pub fn resolve_conflict(policy: ConflictResolution, local: &Record, remote: &Record) -> Resolution {
    match policy {
        ConflictResolution::Local => Resolution::KeepLocal,
        ConflictResolution::Remote => Resolution::TakeRemote,
        ConflictResolution::Merge => {
            // Missing timestamps sort oldest.
            let (older, newer) = if remote.updated_at() > local.updated_at() {
                (local, remote)
            } else {
                (remote, local)
            };
            let mut merged = older.clone();
            merged.apply(newer.fields());
            Resolution::Merged(merged)
        }
    }
}

// =============================================================================
// Best-Effort Outcomes
// =============================================================================

/// Result of a bookkeeping step whose failure is logged and swallowed.
///
/// Kept distinct from `Result` so call sites show that the failure is
/// intentionally not propagated.
#[derive(Debug, Clone, PartialEq)]
pub enum BestEffort<T> {
    Done(T),
    Failed(String),
}

impl<T> BestEffort<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, BestEffort::Done(_))
    }

    /// The value, if the step succeeded.
    pub fn ok(self) -> Option<T> {
        match self {
            BestEffort::Done(v) => Some(v),
            BestEffort::Failed(_) => None,
        }
    }

    pub fn unwrap_or(self, fallback: T) -> T {
        self.ok().unwrap_or(fallback)
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for BestEffort<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => BestEffort::Done(v),
            Err(e) => BestEffort::Failed(e.to_string()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn rec(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_failed_result_carries_error() {
        let result = SyncResult::failed(Utc::now(), "cloud unreachable");
        assert!(!result.success);
        assert_eq!(result.errors, vec!["cloud unreachable".to_string()]);
    }

    #[test]
    fn test_merge_sums_counts_and_keeps_latest_time() {
        let t0 = Utc::now();
        let mut local = SyncResult::new(t0);
        local.records_synced = 3;
        local.conflicts_resolved = 1;

        let mut cloud = SyncResult::new(t0 + Duration::seconds(1));
        cloud.records_synced = 2;
        cloud.push_error("Failed to sync message: timeout");

        local.merge(cloud);

        assert_eq!(local.records_synced, 5);
        assert_eq!(local.conflicts_resolved, 1);
        assert_eq!(local.last_sync_time, t0 + Duration::seconds(1));
        assert!(!local.success);
        assert_eq!(local.errors.len(), 1);
    }

    #[test]
    fn test_conflict_policy_parses_cloud_alias() {
        let policy: ConflictResolution = serde_json::from_value(json!("cloud")).unwrap();
        assert_eq!(policy, ConflictResolution::Remote);
    }

    #[test]
    fn test_local_and_remote_policies() {
        let a = rec(json!({ "id": "1", "name": "a" }));
        let b = rec(json!({ "id": "1", "name": "b" }));

        assert_eq!(resolve_conflict(ConflictResolution::Local, &a, &b), Resolution::KeepLocal);
        assert_eq!(resolve_conflict(ConflictResolution::Remote, &a, &b), Resolution::TakeRemote);
    }

    #[test]
    fn test_merge_newer_remote_overlays_local() {
        let local = rec(json!({
            "id": "1", "name": "local", "phone": "123",
            "updatedAt": "2026-01-01T00:00:00.000000000Z"
        }));
        let remote = rec(json!({
            "id": "1", "name": "remote", "bio": "hi",
            "updatedAt": "2026-01-02T00:00:00.000000000Z"
        }));

        let Resolution::Merged(merged) = resolve_conflict(ConflictResolution::Merge, &local, &remote)
        else {
            panic!("expected merged record");
        };

        assert_eq!(merged.get("name"), Some(&json!("remote")));
        assert_eq!(merged.get("phone"), Some(&json!("123")));
        assert_eq!(merged.get("bio"), Some(&json!("hi")));
    }

    #[test]
    fn test_merge_tie_favours_local() {
        let local = rec(json!({ "id": "1", "name": "local", "updatedAt": "2026-01-01T00:00:00.000000000Z" }));
        let remote = rec(json!({ "id": "1", "name": "remote", "updatedAt": "2026-01-01T00:00:00.000000000Z" }));

        let Resolution::Merged(merged) = resolve_conflict(ConflictResolution::Merge, &local, &remote)
        else {
            panic!("expected merged record");
        };
        assert_eq!(merged.get("name"), Some(&json!("local")));
    }

    #[test]
    fn test_best_effort_from_result() {
        let done: BestEffort<u64> = Ok::<u64, String>(3).into();
        let failed: BestEffort<u64> = Err::<u64, String>("disk full".into()).into();

        assert!(done.is_done());
        assert_eq!(failed.clone().unwrap_or(0), 0);
        assert_eq!(failed, BestEffort::Failed("disk full".into()));
    }
}
