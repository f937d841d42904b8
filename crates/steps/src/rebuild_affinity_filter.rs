// SPDX-License-Identifier: Apache-2.0

//! Pins rebuilds to the host the workload already lives on.
//!
//! A rebuild re-provisions an existing instance in place; moving it would
//! turn the rebuild into an unrequested migration. When the request
//! carries the rebuild flag and names the current host, every other
//! candidate is filtered out. Fresh placements pass through untouched.

use async_trait::async_trait;
use cortex_config::SchedulingDomain;
use cortex_config::objects::StepSpec;
use cortex_engine::request::PlacementRequest;
use cortex_engine::step::{Activations, SchedulerStep, StepError, StepResult};
use cortex_engine::tracer::RunTracer;
use cortex_engine::{FILTER_FACTORIES, FilterFactory, StepContext, distributed_slice};
use serde::Deserialize;

/// The registered plugin name.
pub const REBUILD_AFFINITY_FILTER_PLUGIN: &str = "rebuild-affinity";

/// Parameters of the rebuild affinity filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RebuildAffinityFilterParams {
    /// The spec key naming the instance's current host.
    pub spec_key: String,
}

impl Default for RebuildAffinityFilterParams {
    fn default() -> Self {
        RebuildAffinityFilterParams {
            spec_key: "current_host".to_owned(),
        }
    }
}

/// Filters every host but the current one on rebuilds.
pub struct RebuildAffinityFilter {
    params: RebuildAffinityFilterParams,
}

#[async_trait]
impl SchedulerStep for RebuildAffinityFilter {
    async fn run(
        &self,
        _tracer: &RunTracer,
        request: &PlacementRequest,
        activations: &Activations,
    ) -> Result<StepResult, StepError> {
        if !request.rebuild {
            return Ok(StepResult::passthrough(activations));
        }
        let Some(current) = request
            .spec
            .get(&self.params.spec_key)
            .and_then(|v| v.as_str())
            .filter(|host| !host.is_empty())
        else {
            return Ok(StepResult::passthrough(activations));
        };

        let mut result = StepResult::default();
        if activations.contains_key(current) {
            let _ = result.activations.insert(current.to_owned(), 0.0);
        }
        Ok(result)
    }
}

fn create_rebuild_affinity_filter(
    _ctx: &StepContext,
    spec: &StepSpec,
) -> Result<Box<dyn SchedulerStep>, cortex_config::error::Error> {
    let params = if spec.params.is_null() {
        RebuildAffinityFilterParams::default()
    } else {
        serde_json::from_value(spec.params.clone()).map_err(|e| {
            cortex_config::error::Error::InvalidStepParams {
                step: spec.effective_name().to_owned(),
                details: e.to_string(),
            }
        })?
    };
    Ok(Box::new(RebuildAffinityFilter { params }))
}

/// Register the rebuild affinity filter for the compute domain.
#[allow(unsafe_code)]
#[distributed_slice(FILTER_FACTORIES)]
pub static REBUILD_AFFINITY_FILTER_FACTORY: FilterFactory = FilterFactory {
    plugin: REBUILD_AFFINITY_FILTER_PLUGIN,
    domains: &[SchedulingDomain::Compute],
    knowledge: &[],
    create: create_rebuild_affinity_filter,
};
