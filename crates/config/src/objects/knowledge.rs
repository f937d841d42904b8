// SPDX-License-Identifier: Apache-2.0

//! Declarative knowledge handles.
//!
//! A knowledge handle names a feature table published by the external
//! knowledge store, together with the schema version the publisher
//! currently guarantees. The handle's `Ready` condition acts as a latch:
//! pipelines referencing a not-ready handle stay out of the live registry.

use crate::conditions::{Condition, is_ready};
use crate::objects::ObjectMeta;
use serde::{Deserialize, Serialize};

/// A declarative knowledge handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeObject {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// The feature table this handle points at.
    pub spec: KnowledgeSpec,
    /// Publisher-written status.
    #[serde(default)]
    pub status: KnowledgeStatus,
}

/// The feature table a knowledge handle points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeSpec {
    /// Physical table name in the knowledge store.
    pub table: String,
    /// Schema version the publisher guarantees for rows of the table.
    pub schema_version: u32,
}

/// Publisher-written status of a knowledge handle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KnowledgeStatus {
    /// Status conditions; the publisher maintains the `Ready` condition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl KnowledgeObject {
    /// Whether the publisher currently marks this handle ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        is_ready(&self.status.conditions)
    }
}
