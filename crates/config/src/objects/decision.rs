// SPDX-License-Identifier: Apache-2.0

//! Persisted scheduling decisions.
//!
//! Decisions are written off the hot path by the decision writer and are
//! consumed by the reservation subsystem to determine which reservations
//! have been honored. Persistence is best-effort.

use crate::objects::ObjectMeta;
use crate::{HostId, PipelineName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A persisted scheduling decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionObject {
    /// Object metadata; the name is derived from the resource id.
    pub metadata: ObjectMeta,
    /// Identity of the decision.
    pub spec: DecisionSpec,
    /// The outcome of the pipeline run.
    #[serde(default)]
    pub status: DecisionStatus,
}

/// Identity of a scheduling decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionSpec {
    /// Identifier of the scheduled resource (e.g. the instance uuid).
    pub resource_id: String,
    /// The pipeline that produced the decision.
    pub pipeline: PipelineName,
    /// Digest of the opaque input spec bundle, for downstream idempotency
    /// checks.
    pub input_spec_digest: String,
}

/// The outcome of a pipeline run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionStatus {
    /// The ranked result, absent until the run completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DecisionResult>,
    /// When the decision was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// The ranked outcome of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    /// The best host, i.e. the head of `ordered_hosts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_host: Option<HostId>,
    /// All surviving hosts, best first.
    pub ordered_hosts: Vec<HostId>,
    /// The score delta each step applied to each surviving host.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_step_deltas: Vec<StepDeltas>,
}

/// The score deltas one step applied during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDeltas {
    /// The step's effective name within its pipeline.
    pub step: String,
    /// Applied delta per host that survived the step.
    pub deltas: BTreeMap<HostId, f64>,
}

impl DecisionResult {
    /// Builds a result from an ordered host list, deriving `target_host`.
    #[must_use]
    pub fn from_ordered(ordered_hosts: Vec<HostId>, per_step_deltas: Vec<StepDeltas>) -> Self {
        DecisionResult {
            target_host: ordered_hosts.first().cloned(),
            ordered_hosts,
            per_step_deltas,
        }
    }
}
