//! # Record Repository
//!
//! Model-generic CRUD implemented once on top of [`StoreSession`], so every
//! engine gets identical filter, paging and constraint semantics.
//!
//! ## Constraints Enforced
//! - The model must be registered (`ModelNotFound`)
//! - Ids are unique per model and immutable once assigned
//! - Fields listed as unique for the model hold distinct non-null values
//!
//! Writes go through the session, so they commit or roll back with it.

use serde_json::Value;
use strata_core::{fields, Fields, Mutation, Query, Record};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::{ModelRegistry, ModelSpec};
use crate::store::StoreSession;

/// CRUD over one store session.
pub struct RecordRepository<'s> {
    session: &'s mut dyn StoreSession,
    models: &'s ModelRegistry,
}

impl<'s> RecordRepository<'s> {
    /// Creates a repository bound to a session.
    pub fn new(session: &'s mut dyn StoreSession, models: &'s ModelRegistry) -> Self {
        RecordRepository { session, models }
    }

    /// Inserts a record, assigning a UUID v4 id when none is given.
    pub async fn create(&mut self, model: &str, data: Fields) -> DbResult<Record> {
        let spec = self.models.require(model)?;
        let rows = self.session.load(model).await?;

        let record = with_id(data)?;
        check_new_id(&rows, &record)?;
        check_unique(spec, &rows, &record)?;

        self.session.save(model, &record).await?;

        debug!(model = %model, id = ?record.id(), "Record created");
        Ok(record)
    }

    /// Inserts several records. Constraints also hold within the batch.
    pub async fn create_many(&mut self, model: &str, batch: Vec<Fields>) -> DbResult<u64> {
        let spec = self.models.require(model)?;
        let mut rows = self.session.load(model).await?;

        let mut count = 0u64;
        for data in batch {
            let record = with_id(data)?;
            check_new_id(&rows, &record)?;
            check_unique(spec, &rows, &record)?;

            self.session.save(model, &record).await?;
            rows.push(record);
            count += 1;
        }

        debug!(model = %model, count, "Records created");
        Ok(count)
    }

    /// Returns all records matching the query, ordered and paged.
    pub async fn find_many(&mut self, model: &str, query: &Query) -> DbResult<Vec<Record>> {
        self.models.require(model)?;
        let rows = self.session.load(model).await?;
        Ok(query.select(rows)?)
    }

    /// Returns the first record matching the query.
    pub async fn find_unique(&mut self, model: &str, query: &Query) -> DbResult<Option<Record>> {
        let mut first = query.clone();
        first.take = Some(1);
        Ok(self.find_many(model, &first).await?.into_iter().next())
    }

    /// Patches the first record matching the query.
    pub async fn update(&mut self, model: &str, mutation: &Mutation) -> DbResult<Record> {
        let spec = self.models.require(model)?;
        let rows = self.session.load(model).await?;

        let mut record = first_match(model, &mutation.query, rows.clone())?;
        record.apply(&without_id(&mutation.data));
        check_unique(spec, &rows, &record)?;

        self.session.save(model, &record).await?;

        debug!(model = %model, id = ?record.id(), "Record updated");
        Ok(record)
    }

    /// Patches every record matching the query.
    pub async fn update_many(&mut self, model: &str, mutation: &Mutation) -> DbResult<u64> {
        let spec = self.models.require(model)?;
        let mut rows = self.session.load(model).await?;
        let matched = mutation.query.select(rows.clone())?;
        let patch = without_id(&mutation.data);

        let mut count = 0u64;
        for mut record in matched {
            record.apply(&patch);
            check_unique(spec, &rows, &record)?;

            self.session.save(model, &record).await?;
            if let Some(slot) = rows.iter_mut().find(|r| r.id() == record.id()) {
                *slot = record;
            }
            count += 1;
        }

        debug!(model = %model, count, "Records updated");
        Ok(count)
    }

    /// Deletes the first record matching the query and returns it.
    pub async fn delete(&mut self, model: &str, query: &Query) -> DbResult<Record> {
        self.models.require(model)?;
        let rows = self.session.load(model).await?;

        let record = first_match(model, query, rows)?;
        let id = record.id().unwrap_or_default().to_string();
        self.session.remove(model, &id).await?;

        debug!(model = %model, id = %id, "Record deleted");
        Ok(record)
    }

    /// Deletes every record matching the query.
    pub async fn delete_many(&mut self, model: &str, query: &Query) -> DbResult<u64> {
        self.models.require(model)?;
        let rows = self.session.load(model).await?;

        let mut count = 0u64;
        for record in query.select(rows)? {
            if let Some(id) = record.id() {
                if self.session.remove(model, id).await? {
                    count += 1;
                }
            }
        }

        debug!(model = %model, count, "Records deleted");
        Ok(count)
    }

    /// Writes a full record by id, inserting or replacing it.
    ///
    /// Used when copying records between stores, where the id and
    /// timestamps come from the source.
    pub async fn upsert(&mut self, model: &str, record: &Record) -> DbResult<()> {
        let spec = self.models.require(model)?;
        if record.id().is_none() {
            return Err(DbError::QueryFailed(format!(
                "cannot upsert a {model} record without an id"
            )));
        }

        let rows = self.session.load(model).await?;
        check_unique(spec, &rows, record)?;
        self.session.save(model, record).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn with_id(data: Fields) -> DbResult<Record> {
    let mut record = Record::new(data);
    let needs_id = match record.get(fields::ID) {
        None | Some(Value::Null) => true,
        Some(Value::String(id)) if !id.is_empty() => false,
        Some(other) => {
            return Err(DbError::QueryFailed(format!(
                "record id must be a non-empty string, got {other}"
            )))
        }
    };

    if needs_id {
        record.set(fields::ID, Uuid::new_v4().to_string());
    }
    Ok(record)
}

fn without_id(data: &Fields) -> Fields {
    let mut patch = data.clone();
    patch.remove(fields::ID);
    patch
}

fn first_match(model: &str, query: &Query, rows: Vec<Record>) -> DbResult<Record> {
    query
        .select(rows)?
        .into_iter()
        .next()
        .ok_or_else(|| DbError::not_found(model, query.pinned_id().unwrap_or("<query>")))
}

fn check_new_id(rows: &[Record], record: &Record) -> DbResult<()> {
    let id = record.id().unwrap_or_default();
    if rows.iter().any(|r| r.id() == Some(id)) {
        return Err(DbError::duplicate(fields::ID, id));
    }
    Ok(())
}

fn check_unique(spec: &ModelSpec, rows: &[Record], record: &Record) -> DbResult<()> {
    for field in &spec.unique {
        let value = match record.get(field) {
            None | Some(Value::Null) => continue,
            Some(v) => v,
        };

        let taken = rows
            .iter()
            .any(|r| r.id() != record.id() && r.get(field) == Some(value));
        if taken {
            let shown = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            return Err(DbError::duplicate(field.as_str(), shown));
        }
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RecordStore};
    use serde_json::json;
    use strata_core::SortDirection;

    fn data(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    async fn open_store() -> MemoryStore {
        let store = MemoryStore::new("records");
        store.open().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_assigns_uuid() {
        let store = open_store().await;
        let mut session = store.begin().await.unwrap();
        let mut repo = RecordRepository::new(&mut *session, store.models());

        let record = repo.create("user", data(json!({ "email": "a@x.com" }))).await.unwrap();

        let id = record.id().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_model_fails() {
        let store = open_store().await;
        let mut session = store.begin().await.unwrap();
        let mut repo = RecordRepository::new(&mut *session, store.models());

        let err = repo.find_many("invoice", &Query::all()).await.unwrap_err();
        assert!(matches!(err, DbError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn test_unique_email_enforced_within_batch() {
        let store = open_store().await;
        let mut session = store.begin().await.unwrap();
        let mut repo = RecordRepository::new(&mut *session, store.models());

        let err = repo
            .create_many(
                "user",
                vec![
                    data(json!({ "email": "dup@x.com" })),
                    data(json!({ "email": "dup@x.com" })),
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::UniqueViolation { field, .. } if field == "email"));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = open_store().await;
        let mut session = store.begin().await.unwrap();
        let mut repo = RecordRepository::new(&mut *session, store.models());

        repo.create("topic", data(json!({ "id": "t1" }))).await.unwrap();
        let err = repo.create("topic", data(json!({ "id": "t1" }))).await.unwrap_err();

        assert!(matches!(err, DbError::UniqueViolation { field, .. } if field == "id"));
    }

    #[tokio::test]
    async fn test_update_keeps_id_and_reports_missing() {
        let store = open_store().await;
        let mut session = store.begin().await.unwrap();
        let mut repo = RecordRepository::new(&mut *session, store.models());

        repo.create("topic", data(json!({ "id": "t1", "title": "a" }))).await.unwrap();

        let updated = repo
            .update(
                "topic",
                &Mutation::new(Query::by_id("t1"), data(json!({ "id": "zzz", "title": "b" }))),
            )
            .await
            .unwrap();
        assert_eq!(updated.id(), Some("t1"));
        assert_eq!(updated.get("title"), Some(&json!("b")));

        let err = repo
            .update("topic", &Mutation::new(Query::by_id("nope"), Fields::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { id, .. } if id == "nope"));
    }

    #[tokio::test]
    async fn test_batch_update_and_delete() {
        let store = open_store().await;
        let mut session = store.begin().await.unwrap();
        let mut repo = RecordRepository::new(&mut *session, store.models());

        for (i, role) in ["bot", "user", "bot"].iter().enumerate() {
            repo.create("message", data(json!({ "seq": i, "role": role })))
                .await
                .unwrap();
        }

        let bots = Query::new().filter("role", json!("bot"));
        let changed = repo
            .update_many("message", &Mutation::new(bots.clone(), data(json!({ "read": true }))))
            .await
            .unwrap();
        assert_eq!(changed, 2);

        let read = repo
            .find_many(
                "message",
                &Query::new().filter("read", json!(true)).order_by("seq", SortDirection::Asc),
            )
            .await
            .unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].get("seq"), Some(&json!(2)));

        assert_eq!(repo.delete_many("message", &bots).await.unwrap(), 2);
        assert_eq!(repo.find_many("message", &Query::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_unique_and_delete() {
        let store = open_store().await;
        let mut session = store.begin().await.unwrap();
        let mut repo = RecordRepository::new(&mut *session, store.models());

        repo.create("user", data(json!({ "id": "u1", "email": "a@x.com" })))
            .await
            .unwrap();

        let found = repo
            .find_unique("user", &Query::new().filter("email", json!("a@x.com")))
            .await
            .unwrap();
        assert_eq!(found.and_then(|r| r.id().map(str::to_string)), Some("u1".into()));

        let deleted = repo.delete("user", &Query::by_id("u1")).await.unwrap();
        assert_eq!(deleted.id(), Some("u1"));
        assert!(repo.find_unique("user", &Query::by_id("u1")).await.unwrap().is_none());
    }
}
