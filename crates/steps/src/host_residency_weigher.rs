// SPDX-License-Identifier: Apache-2.0

//! Weighs hosts by project residency.
//!
//! Hosts already running instances of the requesting project are
//! preferred, saturating at `saturation` instances so one crowded host
//! cannot dominate the ranking. The residency histogram comes from the
//! `host-residency` knowledge table.

use crate::{HOST_RESIDENCY_HANDLE, fetch_handle_rows};
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
pub const HOST_RESIDENCY_WEIGHER_PLUGIN: &str = "host-residency";

/// Parameters of the host residency weigher.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HostResidencyWeigherParams {
    /// Scales the delta.
    pub multiplier: f64,
    /// Instance count at which the preference saturates.
    pub saturation: u64,
}

impl Default for HostResidencyWeigherParams {
    fn default() -> Self {
        HostResidencyWeigherParams {
            multiplier: 0.5,
            saturation: 10,
        }
    }
}

/// Weighs hosts by same-project residency.
pub struct HostResidencyWeigher {
    params: HostResidencyWeigherParams,
    knowledge: Arc<dyn KnowledgeStore>,
    handles: HandleTable,
}

#[async_trait]
impl SchedulerStep for HostResidencyWeigher {
    async fn run(
        &self,
        _tracer: &RunTracer,
        request: &PlacementRequest,
        activations: &Activations,
    ) -> Result<StepResult, StepError> {
        let Some(project) = request.spec.get("project_id").and_then(|v| v.as_str()) else {
            return Ok(StepResult::passthrough(activations));
        };

        let rows =
            fetch_handle_rows(&self.knowledge, &self.handles, HOST_RESIDENCY_HANDLE).await?;
        let residency: BTreeMap<&str, f64> = rows
            .iter()
            .filter(|row| row.get_str("project_id") == Some(project))
            .filter_map(|row| Some((row.get_str("host")?, row.get_f64("instances")?)))
            .collect();

        let saturation = self.params.saturation.max(1) as f64;
        let mut result = StepResult::default();
        for host in activations.keys() {
            let instances = residency.get(host.as_str()).copied().unwrap_or(0.0);
            let delta = self.params.multiplier * (instances.min(saturation) / saturation);
            let _ = result.activations.insert(host.clone(), delta);
        }
        Ok(result)
    }
}

fn create_host_residency_weigher(
    ctx: &StepContext,
    spec: &StepSpec,
) -> Result<Box<dyn SchedulerStep>, cortex_config::error::Error> {
    let params: HostResidencyWeigherParams = if spec.params.is_null() {
        HostResidencyWeigherParams::default()
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
    Ok(Box::new(HostResidencyWeigher {
        params,
        knowledge: Arc::clone(&ctx.knowledge),
        handles: ctx.handles.clone(),
    }))
}

/// Register the host residency weigher for the compute domain.
#[allow(unsafe_code)]
#[distributed_slice(WEIGHER_FACTORIES)]
pub static HOST_RESIDENCY_WEIGHER_FACTORY: WeigherFactory = WeigherFactory {
    plugin: HOST_RESIDENCY_WEIGHER_PLUGIN,
    domains: &[SchedulingDomain::Compute],
    knowledge: &[HOST_RESIDENCY_HANDLE],
    create: create_host_residency_weigher,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use serde_json::json;

    fn weigher() -> HostResidencyWeigher {
        let ctx = test_support::context_with_table(
            SchedulingDomain::Compute,
            HOST_RESIDENCY_HANDLE,
            "feature_host_residency_v1",
            vec![
                json!({"host": "node001", "project_id": "p1", "instances": 5.0}),
                json!({"host": "node002", "project_id": "p1", "instances": 40.0}),
                json!({"host": "node001", "project_id": "p2", "instances": 9.0}),
            ],
        );
        HostResidencyWeigher {
            params: HostResidencyWeigherParams::default(),
            knowledge: ctx.knowledge,
            handles: ctx.handles,
        }
    }

    #[tokio::test]
    async fn prefers_hosts_running_the_project_and_saturates() {
        let mut request = test_support::request(&["node001", "node002", "node003"]);
        let _ = request.spec.insert("project_id".to_owned(), json!("p1"));

        let result = weigher()
            .run(
                &test_support::tracer(),
                &request,
                &test_support::activations(&["node001", "node002", "node003"]),
            )
            .await
            .unwrap();
        assert_eq!(result.activations["node001"], 0.25);
        // 40 instances saturate at 10.
        assert_eq!(result.activations["node002"], 0.5);
        assert_eq!(result.activations["node003"], 0.0);
    }

    #[tokio::test]
    async fn passes_through_without_a_project() {
        let result = weigher()
            .run(
                &test_support::tracer(),
                &test_support::request(&["node001"]),
                &test_support::activations(&["node001"]),
            )
            .await
            .unwrap();
        assert_eq!(result.activations["node001"], 0.0);
    }
}
