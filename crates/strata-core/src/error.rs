//! # Error Types
//!
//! Errors raised while interpreting records and queries.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  strata-core errors (this file)                                        │
//! │  └── CoreError     - Malformed filters, timestamps, documents          │
//! │                                                                         │
//! │  strata-db errors (separate crate)                                     │
//! │  └── DbError       - Record store failures                             │
//! │                                                                         │
//! │  strata-sync errors (separate crate)                                   │
//! │  └── StorageError  - What callers of the manager branch on             │
//! │                                                                         │
//! │  Flow: CoreError → DbError → StorageError → Caller                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Errors produced by pure record/query logic.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// A `where` clause used an operator object that is not understood.
    ///
    /// ## When This Occurs
    /// - `{"email": {"startsWith": "a"}}` (unsupported operator)
    /// - `{"id": {"in": "abc"}}` (`in` requires an array)
    #[error("Invalid filter on '{field}': {reason}")]
    InvalidFilter { field: String, reason: String },

    /// A timestamp field could not be parsed as RFC 3339.
    #[error("Invalid timestamp in '{field}': {value}")]
    InvalidTimestamp { field: String, value: String },

    /// A document was not a JSON object.
    #[error("Record must be a JSON object, got: {0}")]
    NotAnObject(String),
}

impl CoreError {
    /// Creates an InvalidFilter error.
    pub fn invalid_filter(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InvalidFilter {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
