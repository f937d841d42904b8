// SPDX-License-Identifier: Apache-2.0

//! Declarative pipeline objects.

use crate::conditions::Condition;
use crate::error::Error;
use crate::objects::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A declarative pipeline: an ordered list of filter steps followed by an
/// ordered list of weigher steps within one scheduling domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineObject {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// The desired pipeline shape.
    pub spec: PipelineSpec,
    /// Controller-written status.
    #[serde(default)]
    pub status: PipelineStatus,
}

/// The desired shape of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSpec {
    /// The pipeline flavor, e.g. `external`. Carried opaquely for upstream
    /// consumers; this engine only runs external pipelines.
    #[serde(rename = "type", default = "PipelineSpec::default_type")]
    pub pipeline_type: String,
    /// Filter steps, run first, in declared order.
    #[serde(default)]
    pub filters: Vec<StepSpec>,
    /// Weigher steps, run after all filters, in declared order.
    #[serde(default)]
    pub weighers: Vec<StepSpec>,
    /// Whether runs of this pipeline enqueue decision records.
    #[serde(default)]
    pub create_decisions: bool,
}

impl PipelineSpec {
    fn default_type() -> String {
        "external".to_owned()
    }
}

/// One step entry in a pipeline spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    /// Registered plugin name.
    pub plugin: String,
    /// Optional instance name; defaults to the plugin name. Required when
    /// the same plugin appears twice in one pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Opaque parameter bundle handed to the plugin factory.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Extra knowledge handles this step depends on, in addition to the
    /// dependencies the plugin itself declares.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knowledge: Vec<String>,
}

impl StepSpec {
    /// The name this step instance is known by within its pipeline.
    #[must_use]
    pub fn effective_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.plugin)
    }
}

/// Controller-written pipeline status.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Status conditions; the engine maintains the `Ready` condition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl PipelineObject {
    /// Validates the structural invariants of the spec: non-empty names and
    /// unique effective step names across filters and weighers.
    pub fn validate(&self) -> Result<(), Error> {
        let pipeline = &self.metadata.name;
        if pipeline.is_empty() {
            return Err(Error::EmptyField {
                pipeline: "<unnamed>".to_owned(),
                field: "pipeline name".to_owned(),
            });
        }
        let mut seen = BTreeSet::new();
        for step in self.spec.filters.iter().chain(&self.spec.weighers) {
            if step.plugin.is_empty() {
                return Err(Error::EmptyField {
                    pipeline: pipeline.clone(),
                    field: "plugin name".to_owned(),
                });
            }
            if !seen.insert(step.effective_name().to_owned()) {
                return Err(Error::DuplicateStep {
                    pipeline: pipeline.clone(),
                    step: step.effective_name().to_owned(),
                });
            }
        }
        Ok(())
    }
}
