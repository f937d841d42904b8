// SPDX-License-Identifier: Apache-2.0

//! The knowledge-store interface and the handle table.
//!
//! The knowledge store serves rows of feature tables. Steps never name
//! physical tables directly: they reference knowledge *handles* by name,
//! and the handle table resolves a handle to its physical table at run
//! time. The table is maintained by the readiness controller from
//! declarative knowledge objects.

use crate::error::Error;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

/// One row of a feature table: a flat JSON object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub serde_json::Map<String, serde_json::Value>);

impl Row {
    /// Returns a string column, or `None` when absent or not a string.
    #[must_use]
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(|v| v.as_str())
    }

    /// Returns a numeric column, or `None` when absent or not a number.
    #[must_use]
    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.0.get(column).and_then(serde_json::Value::as_f64)
    }

    /// Returns a boolean column, or `None` when absent or not a boolean.
    #[must_use]
    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.0.get(column).and_then(serde_json::Value::as_bool)
    }

    /// Decodes the row into a typed shape.
    pub fn decode<T: DeserializeOwned>(&self, table: &str) -> Result<T, Error> {
        serde_json::from_value(serde_json::Value::Object(self.0.clone())).map_err(|e| {
            Error::MalformedRow {
                table: table.to_owned(),
                details: e.to_string(),
            }
        })
    }
}

/// Serves rows of feature tables published by the knowledge pipeline.
///
/// Reads reflect a snapshot taken at call time; a handle flipping to
/// not-ready mid-run does not invalidate rows already fetched.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Fetches all rows of a physical table.
    async fn fetch(&self, table: &str) -> Result<Vec<Row>, Error>;
}

/// A resolved knowledge handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeHandle {
    /// The physical table the handle points at.
    pub table: String,
    /// The schema version the publisher guarantees.
    pub schema_version: u32,
    /// Whether the publisher currently marks the handle ready.
    pub ready: bool,
}

/// The central handle table, keyed by handle name.
///
/// Cheap to clone; all clones share the same underlying map.
#[derive(Clone, Default)]
pub struct HandleTable {
    inner: Arc<RwLock<HashMap<String, KnowledgeHandle>>>,
}

impl HandleTable {
    /// Creates an empty handle table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a handle.
    pub fn upsert(&self, name: impl Into<String>, handle: KnowledgeHandle) {
        let _ = self.inner.write().insert(name.into(), handle);
    }

    /// Removes a handle.
    pub fn remove(&self, name: &str) {
        let _ = self.inner.write().remove(name);
    }

    /// Resolves a handle by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<KnowledgeHandle> {
        self.inner.read().get(name).cloned()
    }

    /// Returns the subset of `names` that is absent or not ready.
    #[must_use]
    pub fn unready<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let handles = self.inner.read();
        names
            .into_iter()
            .filter(|name| !handles.get(*name).is_some_and(|h| h.ready))
            .map(ToOwned::to_owned)
            .collect()
    }
}

/// An in-memory [`KnowledgeStore`] holding tables set by tests or seeds.
#[derive(Default)]
pub struct MemoryKnowledgeStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryKnowledgeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the rows of a table.
    pub fn set_table(&self, table: impl Into<String>, rows: Vec<serde_json::Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::Object(map) => Some(Row(map)),
                _ => None,
            })
            .collect();
        let _ = self.tables.write().insert(table.into(), rows);
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn fetch(&self, table: &str) -> Result<Vec<Row>, Error> {
        self.tables
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| Error::UnknownTable {
                table: table.to_owned(),
            })
    }
}
