// SPDX-License-Identifier: Apache-2.0

//! A filter that keeps every candidate host untouched.
//!
//! Useful for smoke pipelines and for verifying the end-to-end path
//! without any knowledge dependency.

use async_trait::async_trait;
use cortex_config::SchedulingDomain;
use cortex_config::objects::StepSpec;
use cortex_engine::request::PlacementRequest;
use cortex_engine::step::{Activations, SchedulerStep, StepError, StepResult};
use cortex_engine::tracer::RunTracer;
use cortex_engine::{FILTER_FACTORIES, FilterFactory, StepContext, distributed_slice};

/// The registered plugin name.
pub const NOOP_FILTER_PLUGIN: &str = "no-op";

/// A pass-through filter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFilter;

#[async_trait]
impl SchedulerStep for NoopFilter {
    async fn run(
        &self,
        _tracer: &RunTracer,
        _request: &PlacementRequest,
        activations: &Activations,
    ) -> Result<StepResult, StepError> {
        Ok(StepResult::passthrough(activations))
    }
}

fn create_noop_filter(
    _ctx: &StepContext,
    _spec: &StepSpec,
) -> Result<Box<dyn SchedulerStep>, cortex_config::error::Error> {
    Ok(Box::new(NoopFilter))
}

/// Register the no-op filter for every domain.
#[allow(unsafe_code)]
#[distributed_slice(FILTER_FACTORIES)]
pub static NOOP_FILTER_FACTORY: FilterFactory = FilterFactory {
    plugin: NOOP_FILTER_PLUGIN,
    domains: &SchedulingDomain::ALL,
    knowledge: &[],
    create: create_noop_filter,
};
