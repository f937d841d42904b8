// SPDX-License-Identifier: Apache-2.0

//! Declarative objects consumed from and written to the control plane.
//!
//! Objects share a common metadata envelope. The engine never invents
//! fields on foreign objects: anything it does not model is preserved by the
//! store layer, and status mutations are merge-patches against the
//! last-observed revision.

use crate::SchedulingDomain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod decision;
pub mod knowledge;
pub mod pipeline;
pub mod reservation;

pub use decision::{DecisionObject, DecisionResult, DecisionSpec, DecisionStatus, StepDeltas};
pub use knowledge::{KnowledgeObject, KnowledgeSpec, KnowledgeStatus};
pub use pipeline::{PipelineObject, PipelineSpec, PipelineStatus, StepSpec};
pub use reservation::{
    ReservationObject, ReservationSpec, ResourceRequests, SchedulerHint, SchedulerHintNova,
};

/// Common metadata carried by every declarative object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name, unique per kind within a scheduling domain.
    pub name: String,
    /// The scheduling domain the object belongs to.
    pub domain: SchedulingDomain,
    /// Store-managed revision, bumped on every write. Zero for objects that
    /// have never been persisted.
    #[serde(default)]
    pub resource_version: u64,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Creates metadata for a new, not-yet-persisted object.
    #[must_use]
    pub fn new(name: impl Into<String>, domain: SchedulingDomain) -> Self {
        ObjectMeta {
            name: name.into(),
            domain,
            resource_version: 0,
            labels: BTreeMap::new(),
        }
    }
}
