//! # Replica Sync
//!
//! Moves records between the two stores of a hybrid setup and applies the
//! conflict policy.
//!
//! ## Directions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  PUSH (local adapter sync)                                             │
//! │    local pending ──► cloud store                                       │
//! │    • local bookkeeping stripped, cloudSyncedAt stamped at write time   │
//! │    • conflict: cloud copy differs AND changed since our last sync      │
//! │    • returns settlements the local side applies (→ synced)             │
//! │                                                                         │
//! │  PULL (cloud adapter sync)                                             │
//! │    cloud changed ──► local store                                       │
//! │    • unknown locally          → insert as synced                       │
//! │    • same content             → skip                                   │
//! │    • local copy pending       → conflict, policy decides               │
//! │    • local copy synced        → overwrite as synced                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Conflict Outcomes
//! | Policy   | Push                          | Pull                          |
//! |----------|-------------------------------|-------------------------------|
//! | `local`  | local copy written to cloud   | local copy kept (pending)     |
//! | `remote` | cloud copy copied back local  | cloud copy written (synced)   |
//! | `merge`  | merged copy written both ways | merged copy written (pending) |
//!
//! Deletes are not propagated in either direction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use strata_core::{
    fields, resolve_conflict, timestamp, AdapterKind, ConflictResolution, Query, Record,
    Resolution, SyncStatus,
};
use strata_db::{RecordRepository, RecordStore};
use tracing::{debug, info};

use crate::error::StorageResult;

/// What the local side should do with a record after a push.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settlement {
    pub id: String,
    /// `updatedAt` of the local copy that was pushed. The settlement only
    /// applies while the local copy still carries it.
    pub seen: Option<DateTime<Utc>>,
    /// Copy to store locally instead of the current one.
    pub replacement: Option<Record>,
}

#[derive(Debug, Default)]
pub(crate) struct PushOutcome {
    pub settled: Vec<Settlement>,
    pub conflicts: u64,
}

/// The other side's store, as seen from one adapter.
#[derive(Debug, Clone)]
pub(crate) struct Replica {
    kind: AdapterKind,
    store: Arc<dyn RecordStore>,
}

impl Replica {
    pub(crate) fn new(kind: AdapterKind, store: Arc<dyn RecordStore>) -> Self {
        Replica { kind, store }
    }

    pub(crate) fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Writes pending local records into this (cloud) store.
    ///
    /// `cloudSyncedAt` is stamped once the session is open, so a reader
    /// whose pass started before this one committed still sees the records
    /// as changed.
    pub(crate) async fn push(
        &self,
        model: &str,
        pending: &[Record],
        policy: ConflictResolution,
    ) -> StorageResult<PushOutcome> {
        let mut outcome = PushOutcome::default();
        let mut session = self.store.begin().await?;
        let mut repo = RecordRepository::new(&mut *session, self.store.models());
        let now = Utc::now();

        for local in pending {
            let Some(id) = local.id() else {
                continue;
            };
            let remote = repo.find_unique(model, &Query::by_id(id)).await?;

            let mut outgoing = Some(local.clone());
            let mut replacement = None;

            if let Some(remote) = remote.filter(|r| in_conflict(local, r)) {
                outcome.conflicts += 1;
                match resolve_conflict(policy, local, &remote) {
                    Resolution::KeepLocal => {}
                    Resolution::TakeRemote => {
                        outgoing = None;
                        replacement = Some(remote);
                    }
                    Resolution::Merged(merged) => {
                        outgoing = Some(merged.clone());
                        replacement = Some(merged);
                    }
                }
                debug!(model = %model, id = %id, ?policy, "Push conflict resolved");
            }

            if let Some(record) = outgoing {
                repo.upsert(model, &for_cloud(record, now)).await?;
            }

            outcome.settled.push(Settlement {
                id: id.to_string(),
                seen: local.updated_at(),
                replacement,
            });
        }

        session.commit().await?;

        info!(
            model = %model,
            target = %self.kind,
            pushed = outcome.settled.len(),
            conflicts = outcome.conflicts,
            "Pushed pending records"
        );
        Ok(outcome)
    }

    /// Applies records changed in the cloud to this (local) store.
    /// Returns the number of conflicts resolved.
    pub(crate) async fn pull(
        &self,
        model: &str,
        changed: &[Record],
        policy: ConflictResolution,
        now: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let mut conflicts = 0u64;
        let mut applied = 0usize;
        let mut session = self.store.begin().await?;
        let mut repo = RecordRepository::new(&mut *session, self.store.models());

        for remote in changed {
            let Some(id) = remote.id() else {
                continue;
            };
            let local = repo.find_unique(model, &Query::by_id(id)).await?;

            let write = match local {
                None => Some(as_synced(remote.clone(), now)),
                Some(local) if local.content_eq(remote) => None,
                Some(local) if local.is_pending() => {
                    conflicts += 1;
                    debug!(model = %model, id = %id, ?policy, "Pull conflict resolved");
                    match resolve_conflict(policy, &local, remote) {
                        Resolution::KeepLocal => None,
                        Resolution::TakeRemote => Some(as_synced(remote.clone(), now)),
                        Resolution::Merged(merged) => Some(as_pending(merged)),
                    }
                }
                Some(_) => Some(as_synced(remote.clone(), now)),
            };

            if let Some(record) = write {
                repo.upsert(model, &record).await?;
                applied += 1;
            }
        }

        session.commit().await?;

        info!(
            model = %model,
            target = %self.kind,
            fetched = changed.len(),
            applied,
            conflicts,
            "Applied cloud changes"
        );
        Ok(conflicts)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// The cloud copy differs and was written after the local copy last synced.
fn in_conflict(local: &Record, remote: &Record) -> bool {
    !remote.content_eq(local)
        && remote.updated_at() > local.timestamp_field(fields::LAST_SYNCED_AT)
}

fn without(record: Record, names: &[&str]) -> Record {
    let mut data = record.into_fields();
    for name in names {
        data.remove(*name);
    }
    Record::new(data)
}

fn for_cloud(record: Record, now: DateTime<Utc>) -> Record {
    let mut record = without(record, &[fields::SYNC_STATUS, fields::LAST_SYNCED_AT]);
    record.set(fields::CLOUD_SYNCED_AT, timestamp(now));
    record
}

pub(crate) fn as_synced(record: Record, now: DateTime<Utc>) -> Record {
    let mut record = without(record, &[fields::CLOUD_SYNCED_AT]);
    record.set(fields::SYNC_STATUS, SyncStatus::Synced);
    record.set(fields::LAST_SYNCED_AT, timestamp(now));
    record
}

fn as_pending(record: Record) -> Record {
    let mut record = without(record, &[fields::CLOUD_SYNCED_AT]);
    record.set(fields::SYNC_STATUS, SyncStatus::Pending);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_db::MemoryStore;

    fn rec(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    async fn store_with(name: &str, users: &[Record]) -> Arc<dyn RecordStore> {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new(name));
        store.open().await.unwrap();
        let mut session = store.begin().await.unwrap();
        let mut repo = RecordRepository::new(&mut *session, store.models());
        for user in users {
            repo.upsert("user", user).await.unwrap();
        }
        session.commit().await.unwrap();
        store
    }

    async fn read(store: &Arc<dyn RecordStore>, id: &str) -> Option<Record> {
        let mut session = store.begin().await.unwrap();
        let mut repo = RecordRepository::new(&mut *session, store.models());
        let found = repo.find_unique("user", &Query::by_id(id)).await.unwrap();
        found
    }

    #[tokio::test]
    async fn test_push_strips_local_bookkeeping() {
        let cloud = store_with("cloud", &[]).await;
        let replica = Replica::new(AdapterKind::Cloud, cloud.clone());
        let pending = vec![rec(json!({
            "id": "u1", "email": "a@x.com", "syncStatus": "pending",
            "updatedAt": "2026-03-01T00:00:00.000000000Z"
        }))];

        let before = Utc::now();
        let outcome = replica
            .push("user", &pending, ConflictResolution::Merge)
            .await
            .unwrap();

        assert_eq!(outcome.conflicts, 0);
        assert_eq!(outcome.settled.len(), 1);
        assert!(outcome.settled[0].replacement.is_none());

        let stored = read(&cloud, "u1").await.unwrap();
        assert_eq!(stored.get(fields::SYNC_STATUS), None);
        assert!(stored.cloud_synced_at().unwrap() >= before);
    }

    #[tokio::test]
    async fn test_push_conflict_remote_policy_keeps_cloud_copy() {
        let cloud = store_with(
            "cloud",
            &[rec(json!({
                "id": "u1", "email": "cloud@x.com",
                "updatedAt": "2026-03-02T00:00:00.000000000Z"
            }))],
        )
        .await;
        let replica = Replica::new(AdapterKind::Cloud, cloud.clone());
        let pending = vec![rec(json!({
            "id": "u1", "email": "local@x.com", "syncStatus": "pending",
            "updatedAt": "2026-03-01T00:00:00.000000000Z"
        }))];

        let outcome = replica
            .push("user", &pending, ConflictResolution::Remote)
            .await
            .unwrap();

        assert_eq!(outcome.conflicts, 1);
        let replacement = outcome.settled[0].replacement.as_ref().unwrap();
        assert_eq!(replacement.get("email"), Some(&json!("cloud@x.com")));
        assert_eq!(
            read(&cloud, "u1").await.unwrap().get("email"),
            Some(&json!("cloud@x.com"))
        );
    }

    #[tokio::test]
    async fn test_push_over_stale_cloud_copy_is_not_a_conflict() {
        let cloud = store_with(
            "cloud",
            &[rec(json!({
                "id": "u1", "email": "old@x.com",
                "updatedAt": "2026-03-01T00:00:00.000000000Z"
            }))],
        )
        .await;
        let replica = Replica::new(AdapterKind::Cloud, cloud.clone());
        let pending = vec![rec(json!({
            "id": "u1", "email": "new@x.com", "syncStatus": "pending",
            "lastSyncedAt": "2026-03-01T12:00:00.000000000Z",
            "updatedAt": "2026-03-02T00:00:00.000000000Z"
        }))];

        let outcome = replica
            .push("user", &pending, ConflictResolution::Remote)
            .await
            .unwrap();

        assert_eq!(outcome.conflicts, 0);
        assert_eq!(
            read(&cloud, "u1").await.unwrap().get("email"),
            Some(&json!("new@x.com"))
        );
    }

    #[tokio::test]
    async fn test_pull_inserts_unknown_and_skips_identical() {
        let same = rec(json!({ "id": "u1", "email": "a@x.com", "syncStatus": "synced" }));
        let local = store_with("local", &[same]).await;
        let replica = Replica::new(AdapterKind::Local, local.clone());

        let changed = vec![
            rec(json!({ "id": "u1", "email": "a@x.com", "cloudSyncedAt": "2026-03-01T00:00:00.000000000Z" })),
            rec(json!({ "id": "u2", "email": "b@x.com", "cloudSyncedAt": "2026-03-01T00:00:00.000000000Z" })),
        ];

        let conflicts = replica
            .pull("user", &changed, ConflictResolution::Merge, Utc::now())
            .await
            .unwrap();
        assert_eq!(conflicts, 0);

        let inserted = read(&local, "u2").await.unwrap();
        assert_eq!(inserted.sync_status(), Some(SyncStatus::Synced));
        assert!(inserted.get(fields::CLOUD_SYNCED_AT).is_none());
    }

    #[tokio::test]
    async fn test_pull_merge_keeps_pending_fields() {
        let local = store_with(
            "local",
            &[rec(json!({
                "id": "u1", "email": "a@x.com", "phone": "555",
                "syncStatus": "pending",
                "updatedAt": "2026-03-01T00:00:00.000000000Z"
            }))],
        )
        .await;
        let replica = Replica::new(AdapterKind::Local, local.clone());
        let changed = vec![rec(json!({
            "id": "u1", "email": "b@x.com",
            "updatedAt": "2026-03-02T00:00:00.000000000Z"
        }))];

        let conflicts = replica
            .pull("user", &changed, ConflictResolution::Merge, Utc::now())
            .await
            .unwrap();
        assert_eq!(conflicts, 1);

        let merged = read(&local, "u1").await.unwrap();
        assert_eq!(merged.get("email"), Some(&json!("b@x.com")));
        assert_eq!(merged.get("phone"), Some(&json!("555")));
        assert!(merged.is_pending());
    }

    #[tokio::test]
    async fn test_pull_local_policy_leaves_pending_copy() {
        let local = store_with(
            "local",
            &[rec(json!({ "id": "u1", "email": "mine@x.com", "syncStatus": "pending" }))],
        )
        .await;
        let replica = Replica::new(AdapterKind::Local, local.clone());
        let changed = vec![rec(json!({ "id": "u1", "email": "theirs@x.com" }))];

        replica
            .pull("user", &changed, ConflictResolution::Local, Utc::now())
            .await
            .unwrap();

        assert_eq!(
            read(&local, "u1").await.unwrap().get("email"),
            Some(&json!("mine@x.com"))
        );
    }
}
