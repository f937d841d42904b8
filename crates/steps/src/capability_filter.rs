// SPDX-License-Identifier: Apache-2.0

//! Filters hosts lacking required traits.
//!
//! Required traits come from two places: the filter's own parameters and
//! the flavor extra specs in the request (`trait:<name>` keys with the
//! value `required`). Host traits come from the `host-details` knowledge
//! table, where each row carries a `traits` array.

use crate::{HOST_DETAILS_HANDLE, fetch_handle_rows};
use async_trait::async_trait;
use cortex_config::SchedulingDomain;
use cortex_config::objects::StepSpec;
use cortex_engine::request::PlacementRequest;
use cortex_engine::step::{Activations, SchedulerStep, StepError, StepResult};
use cortex_engine::tracer::RunTracer;
use cortex_engine::{FILTER_FACTORIES, FilterFactory, StepContext, distributed_slice};
use cortex_store::{HandleTable, KnowledgeStore};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The registered plugin name.
pub const CAPABILITY_FILTER_PLUGIN: &str = "capability";

/// Parameters of the capability filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CapabilityFilterParams {
    /// Traits every candidate host must expose, regardless of the flavor.
    pub required_traits: Vec<String>,
}

/// Filters hosts that lack a required trait.
pub struct CapabilityFilter {
    params: CapabilityFilterParams,
    knowledge: Arc<dyn KnowledgeStore>,
    handles: HandleTable,
}

impl CapabilityFilter {
    fn required_traits(&self, request: &PlacementRequest) -> BTreeSet<String> {
        let mut required: BTreeSet<String> =
            self.params.required_traits.iter().cloned().collect();
        let extra_specs = request
            .spec
            .get("flavor")
            .and_then(|f| f.get("extra_specs"))
            .and_then(|v| v.as_object());
        if let Some(extra_specs) = extra_specs {
            for (key, value) in extra_specs {
                if let Some(trait_name) = key.strip_prefix("trait:") {
                    if value.as_str() == Some("required") {
                        let _ = required.insert(trait_name.to_owned());
                    }
                }
            }
        }
        required
    }
}

#[async_trait]
impl SchedulerStep for CapabilityFilter {
    async fn run(
        &self,
        _tracer: &RunTracer,
        request: &PlacementRequest,
        activations: &Activations,
    ) -> Result<StepResult, StepError> {
        let required = self.required_traits(request);
        if required.is_empty() {
            return Ok(StepResult::passthrough(activations));
        }

        let rows = fetch_handle_rows(&self.knowledge, &self.handles, HOST_DETAILS_HANDLE).await?;
        let mut host_traits: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for row in &rows {
            let Some(host) = row.get_str("host") else {
                continue;
            };
            let traits = row
                .0
                .get("traits")
                .and_then(|v| v.as_array())
                .map(|values| values.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            let _ = host_traits.insert(host, traits);
        }

        let mut result = StepResult::default();
        for host in activations.keys() {
            let satisfied = host_traits
                .get(host.as_str())
                .is_some_and(|traits| required.iter().all(|t| traits.contains(t.as_str())));
            if satisfied {
                let _ = result.activations.insert(host.clone(), 0.0);
            }
        }
        Ok(result)
    }
}

fn create_capability_filter(
    ctx: &StepContext,
    spec: &StepSpec,
) -> Result<Box<dyn SchedulerStep>, cortex_config::error::Error> {
    let params = if spec.params.is_null() {
        CapabilityFilterParams::default()
    } else {
        serde_json::from_value(spec.params.clone()).map_err(|e| {
            cortex_config::error::Error::InvalidStepParams {
                step: spec.effective_name().to_owned(),
                details: e.to_string(),
            }
        })?
    };
    Ok(Box::new(CapabilityFilter {
        params,
        knowledge: Arc::clone(&ctx.knowledge),
        handles: ctx.handles.clone(),
    }))
}

/// Register the capability filter for the compute domain.
#[allow(unsafe_code)]
#[distributed_slice(FILTER_FACTORIES)]
pub static CAPABILITY_FILTER_FACTORY: FilterFactory = FilterFactory {
    plugin: CAPABILITY_FILTER_PLUGIN,
    domains: &[SchedulingDomain::Compute],
    knowledge: &[HOST_DETAILS_HANDLE],
    create: create_capability_filter,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use serde_json::json;

    fn filter(required: &[&str]) -> CapabilityFilter {
        let ctx = test_support::context_with_table(
            SchedulingDomain::Compute,
            HOST_DETAILS_HANDLE,
            "feature_host_details_v1",
            vec![
                json!({"host": "node001", "traits": ["HW_CPU_X86_AVX2", "STORAGE_DISK_SSD"]}),
                json!({"host": "node002", "traits": ["HW_CPU_X86_AVX2"]}),
                json!({"host": "node003"}),
            ],
        );
        CapabilityFilter {
            params: CapabilityFilterParams {
                required_traits: required.iter().map(|s| (*s).to_owned()).collect(),
            },
            knowledge: ctx.knowledge,
            handles: ctx.handles,
        }
    }

    #[tokio::test]
    async fn keeps_only_hosts_with_all_required_traits() {
        let result = filter(&["STORAGE_DISK_SSD"])
            .run(
                &test_support::tracer(),
                &test_support::request(&["node001", "node002", "node003"]),
                &test_support::activations(&["node001", "node002", "node003"]),
            )
            .await
            .unwrap();
        assert_eq!(result.activations.keys().collect::<Vec<_>>(), ["node001"]);
    }

    #[tokio::test]
    async fn flavor_extra_specs_add_required_traits() {
        let mut request = test_support::request(&["node001", "node002"]);
        let _ = request.spec.insert(
            "flavor".to_owned(),
            json!({"extra_specs": {"trait:STORAGE_DISK_SSD": "required", "trait:IGNORED": "forbidden"}}),
        );
        let result = filter(&[])
            .run(
                &test_support::tracer(),
                &request,
                &test_support::activations(&["node001", "node002"]),
            )
            .await
            .unwrap();
        assert_eq!(result.activations.keys().collect::<Vec<_>>(), ["node001"]);
    }

    #[tokio::test]
    async fn no_required_traits_passes_through() {
        let result = filter(&[])
            .run(
                &test_support::tracer(),
                &test_support::request(&["node001", "node003"]),
                &test_support::activations(&["node001", "node003"]),
            )
            .await
            .unwrap();
        assert_eq!(result.activations.len(), 2);
    }
}
