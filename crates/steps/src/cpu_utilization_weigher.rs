// SPDX-License-Identifier: Apache-2.0

//! Weighs hosts towards low CPU utilization.
//!
//! Each host gets a delta of `multiplier * (1 - cpu_used_pct / 100)`, so
//! an idle host gains the full multiplier and a saturated host gains
//! nothing. Hosts missing from the utilization table get a zero delta and
//! a statistics note, keeping the weigher total over the candidate set.

use crate::{HOST_UTILIZATION_HANDLE, fetch_handle_rows};
use async_trait::async_trait;
use cortex_config::SchedulingDomain;
use cortex_config::objects::StepSpec;
use cortex_engine::request::PlacementRequest;
use cortex_engine::step::{Activations, SchedulerStep, StepError, StepResult};
use cortex_engine::tracer::RunTracer;
use cortex_engine::{StepContext, WEIGHER_FACTORIES, WeigherFactory, distributed_slice};
use cortex_store::{HandleTable, KnowledgeStore};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The registered plugin name.
pub const CPU_UTILIZATION_WEIGHER_PLUGIN: &str = "cpu-utilization-balance";

/// Parameters of the CPU utilization weigher.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CpuUtilizationWeigherParams {
    /// Scales the delta; negative values prefer packed hosts.
    pub multiplier: f64,
}

impl Default for CpuUtilizationWeigherParams {
    fn default() -> Self {
        CpuUtilizationWeigherParams { multiplier: 1.0 }
    }
}

/// Weighs hosts by free CPU headroom.
pub struct CpuUtilizationWeigher {
    params: CpuUtilizationWeigherParams,
    knowledge: Arc<dyn KnowledgeStore>,
    handles: HandleTable,
}

#[async_trait]
impl SchedulerStep for CpuUtilizationWeigher {
    async fn run(
        &self,
        _tracer: &RunTracer,
        _request: &PlacementRequest,
        activations: &Activations,
    ) -> Result<StepResult, StepError> {
        let rows =
            fetch_handle_rows(&self.knowledge, &self.handles, HOST_UTILIZATION_HANDLE).await?;
        let utilization: BTreeMap<&str, f64> = rows
            .iter()
            .filter_map(|row| Some((row.get_str("host")?, row.get_f64("cpu_used_pct")?)))
            .collect();

        let mut result = StepResult::default();
        for host in activations.keys() {
            match utilization.get(host.as_str()) {
                Some(used_pct) => {
                    let headroom = 1.0 - (used_pct / 100.0).clamp(0.0, 1.0);
                    let _ = result
                        .activations
                        .insert(host.clone(), self.params.multiplier * headroom);
                    result.record_statistic(host, "cpu_used_pct", *used_pct);
                }
                None => {
                    let _ = result.activations.insert(host.clone(), 0.0);
                    result.record_statistic(host, "cpu_used_pct_missing", 1.0);
                }
            }
        }
        Ok(result)
    }
}

fn create_cpu_utilization_weigher(
    ctx: &StepContext,
    spec: &StepSpec,
) -> Result<Box<dyn SchedulerStep>, cortex_config::error::Error> {
    let params: CpuUtilizationWeigherParams = if spec.params.is_null() {
        CpuUtilizationWeigherParams::default()
    } else {
        serde_json::from_value(spec.params.clone()).map_err(|e| {
            cortex_config::error::Error::InvalidStepParams {
                step: spec.effective_name().to_owned(),
                details: e.to_string(),
            }
        })?
    };
    if !params.multiplier.is_finite() {
        return Err(cortex_config::error::Error::InvalidStepParams {
            step: spec.effective_name().to_owned(),
            details: "multiplier must be finite".to_owned(),
        });
    }
    Ok(Box::new(CpuUtilizationWeigher {
        params,
        knowledge: Arc::clone(&ctx.knowledge),
        handles: ctx.handles.clone(),
    }))
}

/// Register the CPU utilization weigher for the compute domain.
#[allow(unsafe_code)]
#[distributed_slice(WEIGHER_FACTORIES)]
pub static CPU_UTILIZATION_WEIGHER_FACTORY: WeigherFactory = WeigherFactory {
    plugin: CPU_UTILIZATION_WEIGHER_PLUGIN,
    domains: &[SchedulingDomain::Compute],
    knowledge: &[HOST_UTILIZATION_HANDLE],
    create: create_cpu_utilization_weigher,
};
