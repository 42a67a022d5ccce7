//! # Queries
//!
//! The small query language every adapter accepts. It covers what the
//! callers of the storage engine actually issue: equality and range
//! filters, an incremental-sync window, ordering and paging. It is not a
//! query planner; engines load a model's rows and narrow them here.
//!
//! ## Filter Grammar
//! ```text
//! where := { field: condition, ... }          (all conditions must hold)
//!
//! condition := literal                        field == literal
//!            | { "in":       [v, ...] }       field is one of the values
//!            | { "not":      v }              field != v
//!            | { "gt" | "gte" | "lt" | "lte": v }
//!            | { "contains": v }              substring / array member
//!
//! Operators may be combined: { "gte": 18, "lt": 65 }
//! A literal null matches a missing field as well as an explicit null.
//! ```

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::record::{Fields, Record};

const OPERATORS: &[&str] = &["in", "not", "gt", "gte", "lt", "lte", "contains"];

// =============================================================================
// Ordering
// =============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Sort key for `find_many`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

// =============================================================================
// Query
// =============================================================================

/// Selection over one model's records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Field conditions, all of which must hold.
    #[serde(default, rename = "where")]
    pub filter: Fields,

    /// Only records whose `updatedAt` is strictly after this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_after: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
}

impl Query {
    /// An empty query (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias for [`Query::new`] that reads better at call sites.
    pub fn all() -> Self {
        Self::default()
    }

    /// Selects a single record by id.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().filter(crate::record::fields::ID, Value::String(id.into()))
    }

    /// Adds a field condition.
    pub fn filter(mut self, field: impl Into<String>, condition: Value) -> Self {
        self.filter.insert(field.into(), condition);
        self
    }

    /// Restricts to records updated strictly after `at`.
    pub fn updated_after(mut self, at: DateTime<Utc>) -> Self {
        self.updated_after = Some(at);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn take(mut self, n: usize) -> Self {
        self.take = Some(n);
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    /// Returns the id this query pins, if its filter is a literal id match.
    pub fn pinned_id(&self) -> Option<&str> {
        self.filter
            .get(crate::record::fields::ID)
            .and_then(Value::as_str)
    }

    /// Tests a single record against the filter and the sync window.
    ///
    /// Ordering and paging do not apply to single records.
    pub fn matches(&self, record: &Record) -> Result<bool, CoreError> {
        if let Some(after) = self.updated_after {
            match record.updated_at() {
                Some(updated) if updated > after => {}
                _ => return Ok(false),
            }
        }

        for (field, condition) in &self.filter {
            if !condition_holds(field, record.get(field), condition)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Runs the full query over a model's records: filter, order, skip, take.
    pub fn select<I>(&self, records: I) -> Result<Vec<Record>, CoreError>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut selected = Vec::new();
        for record in records {
            if self.matches(&record)? {
                selected.push(record);
            }
        }

        if let Some(order) = &self.order_by {
            selected.sort_by(|a, b| {
                let ord = compare_optional(a.get(&order.field), b.get(&order.field));
                match order.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        let skip = self.skip.unwrap_or(0);
        let take = self.take.unwrap_or(usize::MAX);
        Ok(selected.into_iter().skip(skip).take(take).collect())
    }
}

// =============================================================================
// Mutation
// =============================================================================

/// Selection plus the fields to overwrite, for `update` / `update_many`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    #[serde(flatten)]
    pub query: Query,
    #[serde(default)]
    pub data: Fields,
}

impl Mutation {
    pub fn new(query: Query, data: Fields) -> Self {
        Self { query, data }
    }
}

// =============================================================================
// Condition Evaluation
// =============================================================================

fn condition_holds(field: &str, value: Option<&Value>, condition: &Value) -> Result<bool, CoreError> {
    let ops = match condition {
        Value::Object(ops) if !ops.is_empty() => ops,
        Value::Object(_) => return Ok(true),
        Value::Null => return Ok(value.map_or(true, Value::is_null)),
        literal => return Ok(value.map_or(false, |v| loose_eq(v, literal))),
    };

    for (op, operand) in ops {
        if !OPERATORS.contains(&op.as_str()) {
            return Err(CoreError::invalid_filter(
                field,
                format!("unsupported operator '{op}'"),
            ));
        }

        let holds = match op.as_str() {
            "in" => {
                let options = operand
                    .as_array()
                    .ok_or_else(|| CoreError::invalid_filter(field, "'in' requires an array"))?;
                value.map_or(false, |v| options.iter().any(|o| loose_eq(v, o)))
            }
            "not" => match (value, operand) {
                (None, Value::Null) => false,
                (None, _) => true,
                (Some(v), o) => !loose_eq(v, o),
            },
            "contains" => match (value, operand) {
                (Some(Value::String(s)), Value::String(needle)) => s.contains(needle.as_str()),
                (Some(Value::Array(items)), needle) => items.iter().any(|i| loose_eq(i, needle)),
                _ => false,
            },
            range => {
                let ord = value.and_then(|v| compare(v, operand));
                match (range, ord) {
                    ("gt", Some(o)) => o == Ordering::Greater,
                    ("gte", Some(o)) => o != Ordering::Less,
                    ("lt", Some(o)) => o == Ordering::Less,
                    ("lte", Some(o)) => o != Ordering::Greater,
                    _ => false,
                }
            }
        };

        if !holds {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Equality that treats `1` and `1.0` as the same number.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Orders two scalars of the same kind; mixed kinds are incomparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order for sorting: missing and null sort first, incomparable
/// values keep their relative order.
fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
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

    fn rec(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn users() -> Vec<Record> {
        vec![
            rec(json!({ "id": "1", "name": "ann", "age": 31, "tags": ["admin"] })),
            rec(json!({ "id": "2", "name": "bob", "age": 17 })),
            rec(json!({ "id": "3", "name": "cyd", "age": 45, "tags": [] })),
        ]
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let out = Query::all().select(users()).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_literal_equality() {
        let out = Query::new().filter("name", json!("bob")).select(users()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), Some("2"));
    }

    #[test]
    fn test_numbers_compare_across_int_and_float() {
        let q = Query::new().filter("age", json!(31.0));
        assert!(q.matches(&users()[0]).unwrap());
    }

    #[test]
    fn test_range_operators_combine() {
        let q = Query::new().filter("age", json!({ "gte": 18, "lt": 40 }));
        let out = q.select(users()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), Some("1"));
    }

    #[test]
    fn test_in_and_not() {
        let q = Query::new()
            .filter("id", json!({ "in": ["1", "3"] }))
            .filter("name", json!({ "not": "cyd" }));
        let out = q.select(users()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), Some("1"));
    }

    #[test]
    fn test_contains_on_strings_and_arrays() {
        let on_string = Query::new().filter("name", json!({ "contains": "o" }));
        let on_array = Query::new().filter("tags", json!({ "contains": "admin" }));

        assert_eq!(on_string.select(users()).unwrap().len(), 1);
        assert_eq!(on_array.select(users()).unwrap().len(), 1);
    }

    #[test]
    fn test_null_literal_matches_missing_field() {
        let q = Query::new().filter("tags", Value::Null);
        let out = q.select(users()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), Some("2"));
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let q = Query::new().filter("name", json!({ "startsWith": "a" }));
        let err = q.matches(&users()[0]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFilter { .. }));
    }

    #[test]
    fn test_in_requires_array() {
        let q = Query::new().filter("id", json!({ "in": "1" }));
        assert!(q.matches(&users()[0]).is_err());
    }

    #[test]
    fn test_order_skip_take() {
        let q = Query::all().order_by("age", SortDirection::Desc).skip(1).take(1);
        let out = q.select(users()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), Some("1"));
    }

    #[test]
    fn test_updated_after_window_is_exclusive() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let old = rec(json!({ "id": "a", "updatedAt": "2026-01-01T00:00:00.000000000Z" }));
        let new = rec(json!({ "id": "b", "updatedAt": "2026-01-01T00:00:01.000000000Z" }));
        let none = rec(json!({ "id": "c" }));

        let out = Query::all().updated_after(at).select(vec![old, new, none]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), Some("b"));
    }

    #[test]
    fn test_query_deserializes_from_where_clause() {
        let q: Query = serde_json::from_value(json!({
            "where": { "email": "a@x.com" },
            "orderBy": { "field": "createdAt", "direction": "desc" },
            "take": 5
        }))
        .unwrap();

        assert_eq!(q.filter.get("email"), Some(&json!("a@x.com")));
        assert_eq!(q.take, Some(5));
        assert_eq!(q.order_by.unwrap().direction, SortDirection::Desc);
    }

    #[test]
    fn test_pinned_id() {
        assert_eq!(Query::by_id("x").pinned_id(), Some("x"));
        assert_eq!(Query::all().pinned_id(), None);
    }
}
