//! # Model Registry
//!
//! The closed set of model names a store accepts, with per-model unique
//! fields. Operations on a name outside the registry fail with
//! [`DbError::ModelNotFound`] instead of silently creating a new table.
//!
//! ## Default Models
//! ```text
//! ┌──────────────────┬──────────────┬──────────┐
//! │ Model            │ Unique       │ Syncable │
//! ├──────────────────┼──────────────┼──────────┤
//! │ user             │ email        │ yes      │
//! │ sshConnection    │              │ yes      │
//! │ chatSession      │              │ yes      │
//! │ topic            │              │          │
//! │ message          │              │ yes      │
//! │ file             │              │          │
//! │ commandLog       │              │          │
//! │ apiKey           │              │          │
//! │ systemConfig     │ key          │          │
//! └──────────────────┴──────────────┴──────────┘
//! ```

use std::collections::BTreeMap;

use crate::error::{DbError, DbResult};

/// Schema facts the engines enforce for one model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSpec {
    /// Fields whose non-null values must be unique across the model.
    pub unique: Vec<String>,
}

/// Registered model names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelSpec>,
    syncable: Vec<String>,
}

impl ModelRegistry {
    /// A registry with no models.
    pub fn empty() -> Self {
        ModelRegistry {
            models: BTreeMap::new(),
            syncable: Vec::new(),
        }
    }

    /// Registers a model with its unique fields.
    pub fn with_model(mut self, name: &str, unique: &[&str]) -> Self {
        self.models.insert(
            name.to_string(),
            ModelSpec {
                unique: unique.iter().map(|f| f.to_string()).collect(),
            },
        );
        self
    }

    /// Replaces the syncable set. Names must already be registered.
    pub fn with_syncable(mut self, names: &[&str]) -> Self {
        self.syncable = names
            .iter()
            .filter(|n| self.models.contains_key(**n))
            .map(|n| n.to_string())
            .collect();
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Looks a model up, failing with `ModelNotFound`.
    pub fn require(&self, name: &str) -> DbResult<&ModelSpec> {
        self.models
            .get(name)
            .ok_or_else(|| DbError::ModelNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Models included in sync passes, in registration order of the list.
    pub fn syncable(&self) -> &[String] {
        &self.syncable
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        ModelRegistry::empty()
            .with_model("user", &["email"])
            .with_model("sshConnection", &[])
            .with_model("chatSession", &[])
            .with_model("topic", &[])
            .with_model("message", &[])
            .with_model("file", &[])
            .with_model("commandLog", &[])
            .with_model("apiKey", &[])
            .with_model("systemConfig", &["key"])
            .with_syncable(&["user", "sshConnection", "chatSession", "message"])
    }
}
