// SPDX-License-Identifier: Apache-2.0

//! Weighs storage pools by backend CPU usage.
//!
//! The shared-filesystem and block-storage analog of the compute CPU
//! utilization weigher: pools whose backend is busy get a smaller delta.
//! Usage comes from the `pool-usage` knowledge table.

use crate::{POOL_USAGE_HANDLE, fetch_handle_rows};
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
pub const POOL_USAGE_WEIGHER_PLUGIN: &str = "pool-cpu-usage";

/// Parameters of the pool usage weigher.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PoolUsageWeigherParams {
    /// Scales the delta; negative values prefer busy pools.
    pub multiplier: f64,
}

impl Default for PoolUsageWeigherParams {
    fn default() -> Self {
        PoolUsageWeigherParams { multiplier: 1.0 }
    }
}

/// Weighs pools by backend CPU headroom.
pub struct PoolUsageWeigher {
    params: PoolUsageWeigherParams,
    knowledge: Arc<dyn KnowledgeStore>,
    handles: HandleTable,
}

#[async_trait]
impl SchedulerStep for PoolUsageWeigher {
    async fn run(
        &self,
        _tracer: &RunTracer,
        _request: &PlacementRequest,
        activations: &Activations,
    ) -> Result<StepResult, StepError> {
        let rows = fetch_handle_rows(&self.knowledge, &self.handles, POOL_USAGE_HANDLE).await?;
        let usage: BTreeMap<&str, f64> = rows
            .iter()
            .filter_map(|row| Some((row.get_str("pool")?, row.get_f64("cpu_used_pct")?)))
            .collect();

        let mut result = StepResult::default();
        for host in activations.keys() {
            let delta = match usage.get(host.as_str()) {
                Some(used_pct) => {
                    self.params.multiplier * (1.0 - (used_pct / 100.0).clamp(0.0, 1.0))
                }
                None => 0.0,
            };
            let _ = result.activations.insert(host.clone(), delta);
        }
        Ok(result)
    }
}

fn create_pool_usage_weigher(
    ctx: &StepContext,
    spec: &StepSpec,
) -> Result<Box<dyn SchedulerStep>, cortex_config::error::Error> {
    let params: PoolUsageWeigherParams = if spec.params.is_null() {
        PoolUsageWeigherParams::default()
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
    Ok(Box::new(PoolUsageWeigher {
        params,
        knowledge: Arc::clone(&ctx.knowledge),
        handles: ctx.handles.clone(),
    }))
}

/// Register the pool usage weigher for the storage domains.
#[allow(unsafe_code)]
#[distributed_slice(WEIGHER_FACTORIES)]
pub static POOL_USAGE_WEIGHER_FACTORY: WeigherFactory = WeigherFactory {
    plugin: POOL_USAGE_WEIGHER_PLUGIN,
    domains: &[
        SchedulingDomain::SharedFilesystem,
        SchedulingDomain::BlockStorage,
    ],
    knowledge: &[POOL_USAGE_HANDLE],
    create: create_pool_usage_weigher,
};
