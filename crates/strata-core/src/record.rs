//! # Records
//!
//! A record is any domain entity stored by an adapter: an opaque model name
//! (carried alongside, not inside the record) plus a JSON object of fields.
//!
//! ## Record Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Record (JSON object)                            │
//! │                                                                         │
//! │  Domain fields            Bookkeeping fields (stamped by adapters)      │
//! │  ─────────────            ─────────────────────────────────────────     │
//! │  id        "3f2a…"        createdAt      "2026-10-19T08:00:00.…Z"       │
//! │  email     "a@x.com"      updatedAt      "2026-10-19T08:00:00.…Z"       │
//! │  username  "alice"        syncStatus     "pending" | "synced"  (local)  │
//! │  ...                      lastSyncedAt   set by markAsSynced   (local)  │
//! │                           cloudSyncedAt  set on cloud writes   (cloud)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Timestamp Format
//! Timestamps are RFC 3339 strings with nanosecond precision and a `Z`
//! suffix. The fixed width keeps lexicographic order equal to time order,
//! which the filter operators rely on.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Field name → value mapping of a record.
pub type Fields = Map<String, Value>;

/// Well-known field names.
pub mod fields {
    /// Record identifier (UUID v4 string when assigned by an engine).
    pub const ID: &str = "id";
    /// Creation time, stamped by adapters on create.
    pub const CREATED_AT: &str = "createdAt";
    /// Last modification time, stamped by adapters on every write.
    pub const UPDATED_AT: &str = "updatedAt";
    /// Local sync marker (`pending` / `synced`).
    pub const SYNC_STATUS: &str = "syncStatus";
    /// When the local copy was last confirmed synced.
    pub const LAST_SYNCED_AT: &str = "lastSyncedAt";
    /// When the cloud store last accepted a write of this record.
    pub const CLOUD_SYNCED_AT: &str = "cloudSyncedAt";

    /// Fields that describe a record's storage history rather than its
    /// content. Ignored when deciding whether two copies conflict.
    pub const BOOKKEEPING: &[&str] = &[
        CREATED_AT,
        UPDATED_AT,
        SYNC_STATUS,
        LAST_SYNCED_AT,
        CLOUD_SYNCED_AT,
    ];
}

/// Formats a timestamp the way every record field stores it.
pub fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

/// Parses a timestamp field value.
pub fn parse_timestamp(field: &str, value: &Value) -> Result<DateTime<Utc>, CoreError> {
    let text = value.as_str().ok_or_else(|| CoreError::InvalidTimestamp {
        field: field.to_string(),
        value: value.to_string(),
    })?;

    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| CoreError::InvalidTimestamp {
            field: field.to_string(),
            value: text.to_string(),
        })
}

// =============================================================================
// Sync Status
// =============================================================================

/// Local sync marker carried in the `syncStatus` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Written locally, not yet confirmed in the cloud.
    Pending,
    /// Confirmed in the cloud.
    Synced,
}

impl SyncStatus {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SyncStatus> for Value {
    fn from(status: SyncStatus) -> Self {
        Value::String(status.as_str().to_string())
    }
}

// =============================================================================
// Record
// =============================================================================

/// A stored record: a JSON object of fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Fields);

impl Record {
    /// Wraps a field map.
    pub fn new(fields: Fields) -> Self {
        Record(fields)
    }

    /// Builds a record from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(map) => Ok(Record(map)),
            other => Err(CoreError::NotAnObject(other.to_string())),
        }
    }

    /// Returns the record id, if it has a string id.
    pub fn id(&self) -> Option<&str> {
        self.0.get(fields::ID).and_then(Value::as_str)
    }

    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets a field value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Overlays `patch` onto this record, field by field.
    pub fn apply(&mut self, patch: &Fields) {
        for (key, value) in patch {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Borrows the field map.
    pub fn fields(&self) -> &Fields {
        &self.0
    }

    /// Consumes the record, returning its field map.
    pub fn into_fields(self) -> Fields {
        self.0
    }

    /// Consumes the record, returning it as a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Returns the local sync marker, if present.
    pub fn sync_status(&self) -> Option<SyncStatus> {
        match self.0.get(fields::SYNC_STATUS).and_then(Value::as_str) {
            Some("pending") => Some(SyncStatus::Pending),
            Some("synced") => Some(SyncStatus::Synced),
            _ => None,
        }
    }

    /// True when the record carries `syncStatus = pending`.
    pub fn is_pending(&self) -> bool {
        self.sync_status() == Some(SyncStatus::Pending)
    }

    /// Parses `updatedAt`, if present and well-formed.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_field(fields::UPDATED_AT)
    }

    /// Parses `cloudSyncedAt`, if present and well-formed.
    pub fn cloud_synced_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_field(fields::CLOUD_SYNCED_AT)
    }

    /// Parses any timestamp field.
    pub fn timestamp_field(&self, field: &str) -> Option<DateTime<Utc>> {
        self.0
            .get(field)
            .and_then(|v| parse_timestamp(field, v).ok())
    }

    /// Returns the record without bookkeeping fields.
    pub fn content(&self) -> Fields {
        self.0
            .iter()
            .filter(|(k, _)| !fields::BOOKKEEPING.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// True when both copies hold the same domain content.
    pub fn content_eq(&self, other: &Record) -> bool {
        self.content() == other.content()
    }
}

impl From<Fields> for Record {
    fn from(fields: Fields) -> Self {
        Record(fields)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_timestamp_round_trip_keeps_nanoseconds() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let value = timestamp(at);

        assert_eq!(value, json!("2023-11-14T22:13:20.123456789Z"));
        assert_eq!(parse_timestamp("updatedAt", &value).unwrap(), at);
    }

    #[test]
    fn test_timestamp_strings_sort_like_times() {
        let earlier = timestamp(Utc.timestamp_opt(1_700_000_000, 900_000_000).unwrap());
        let later = timestamp(Utc.timestamp_opt(1_700_000_001, 0).unwrap());

        assert!(earlier.as_str().unwrap() < later.as_str().unwrap());
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Record::from_value(json!([1, 2])).is_err());
        assert!(Record::from_value(json!({})).is_ok());
    }

    #[test]
    fn test_sync_status_accessors() {
        let pending = record(json!({ "id": "a", "syncStatus": "pending" }));
        let synced = record(json!({ "id": "b", "syncStatus": "synced" }));
        let cloud = record(json!({ "id": "c" }));

        assert!(pending.is_pending());
        assert_eq!(synced.sync_status(), Some(SyncStatus::Synced));
        assert_eq!(cloud.sync_status(), None);
    }

    #[test]
    fn test_content_ignores_bookkeeping() {
        let local = record(json!({
            "id": "u1",
            "email": "a@x.com",
            "syncStatus": "pending",
            "updatedAt": "2026-01-01T00:00:00.000000000Z"
        }));
        let cloud = record(json!({
            "id": "u1",
            "email": "a@x.com",
            "cloudSyncedAt": "2026-01-02T00:00:00.000000000Z",
            "updatedAt": "2026-01-02T00:00:00.000000000Z"
        }));
        let changed = record(json!({ "id": "u1", "email": "b@x.com" }));

        assert!(local.content_eq(&cloud));
        assert!(!local.content_eq(&changed));
    }

    #[test]
    fn test_apply_overlays_fields() {
        let mut rec = record(json!({ "id": "u1", "name": "old", "age": 3 }));
        let patch = json!({ "name": "new" }).as_object().cloned().unwrap();

        rec.apply(&patch);

        assert_eq!(rec.get("name"), Some(&json!("new")));
        assert_eq!(rec.get("age"), Some(&json!(3)));
    }
}
