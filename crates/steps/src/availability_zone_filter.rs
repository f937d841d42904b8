// SPDX-License-Identifier: Apache-2.0

//! Filters hosts outside the requested availability zone.
//!
//! The requested zone is read from the opaque spec bundle; hosts are
//! looked up in the `host-details` knowledge table. A request without a
//! zone passes every host through. Hosts missing from the table are
//! removed: a host the knowledge pipeline has never seen cannot be proven
//! to be in the right zone.

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
use std::collections::BTreeMap;
use std::sync::Arc;

/// The registered plugin name.
pub const AVAILABILITY_ZONE_FILTER_PLUGIN: &str = "availability-zone";

/// Parameters of the availability zone filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AvailabilityZoneFilterParams {
    /// The spec key carrying the requested zone.
    pub spec_key: String,
}

impl Default for AvailabilityZoneFilterParams {
    fn default() -> Self {
        AvailabilityZoneFilterParams {
            spec_key: "availability_zone".to_owned(),
        }
    }
}

/// Filters hosts whose availability zone does not match the request.
pub struct AvailabilityZoneFilter {
    params: AvailabilityZoneFilterParams,
    knowledge: Arc<dyn KnowledgeStore>,
    handles: HandleTable,
}

#[async_trait]
impl SchedulerStep for AvailabilityZoneFilter {
    async fn run(
        &self,
        _tracer: &RunTracer,
        request: &PlacementRequest,
        activations: &Activations,
    ) -> Result<StepResult, StepError> {
        let Some(requested) = request
            .spec
            .get(&self.params.spec_key)
            .and_then(|v| v.as_str())
            .filter(|zone| !zone.is_empty())
        else {
            return Ok(StepResult::passthrough(activations));
        };

        let rows = fetch_handle_rows(&self.knowledge, &self.handles, HOST_DETAILS_HANDLE).await?;
        let zones: BTreeMap<&str, &str> = rows
            .iter()
            .filter_map(|row| Some((row.get_str("host")?, row.get_str("availability_zone")?)))
            .collect();

        let mut result = StepResult::default();
        for host in activations.keys() {
            if zones.get(host.as_str()) == Some(&requested) {
                let _ = result.activations.insert(host.clone(), 0.0);
            }
        }
        Ok(result)
    }
}

fn create_availability_zone_filter(
    ctx: &StepContext,
    spec: &StepSpec,
) -> Result<Box<dyn SchedulerStep>, cortex_config::error::Error> {
    let params = parse_params(spec)?;
    Ok(Box::new(AvailabilityZoneFilter {
        params,
        knowledge: Arc::clone(&ctx.knowledge),
        handles: ctx.handles.clone(),
    }))
}

fn parse_params(spec: &StepSpec) -> Result<AvailabilityZoneFilterParams, cortex_config::error::Error> {
    if spec.params.is_null() {
        return Ok(AvailabilityZoneFilterParams::default());
    }
    serde_json::from_value(spec.params.clone()).map_err(|e| {
        cortex_config::error::Error::InvalidStepParams {
            step: spec.effective_name().to_owned(),
            details: e.to_string(),
        }
    })
}

/// Register the availability zone filter for the compute domain.
#[allow(unsafe_code)]
#[distributed_slice(FILTER_FACTORIES)]
pub static AVAILABILITY_ZONE_FILTER_FACTORY: FilterFactory = FilterFactory {
    plugin: AVAILABILITY_ZONE_FILTER_PLUGIN,
    domains: &[SchedulingDomain::Compute],
    knowledge: &[HOST_DETAILS_HANDLE],
    create: create_availability_zone_filter,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use serde_json::json;

    fn filter() -> AvailabilityZoneFilter {
        let ctx = test_support::context_with_table(
            SchedulingDomain::Compute,
            HOST_DETAILS_HANDLE,
            "feature_host_details_v1",
            vec![
                json!({"host": "node001", "availability_zone": "az-a"}),
                json!({"host": "node002", "availability_zone": "az-b"}),
            ],
        );
        AvailabilityZoneFilter {
            params: AvailabilityZoneFilterParams::default(),
            knowledge: ctx.knowledge,
            handles: ctx.handles,
        }
    }

    #[tokio::test]
    async fn removes_hosts_outside_the_requested_zone() {
        let mut request = test_support::request(&["node001", "node002", "node003"]);
        let _ = request
            .spec
            .insert("availability_zone".to_owned(), json!("az-a"));

        let result = filter()
            .run(
                &test_support::tracer(),
                &request,
                &test_support::activations(&["node001", "node002", "node003"]),
            )
            .await
            .unwrap();
        // node002 is in the wrong zone, node003 is unknown to the table.
        assert_eq!(result.activations.keys().collect::<Vec<_>>(), ["node001"]);
    }

    #[tokio::test]
    async fn passes_through_without_a_requested_zone() {
        let result = filter()
            .run(
                &test_support::tracer(),
                &test_support::request(&["node001", "node002"]),
                &test_support::activations(&["node001", "node002"]),
            )
            .await
            .unwrap();
        assert_eq!(result.activations.len(), 2);
    }

    #[tokio::test]
    async fn unresolved_handle_is_a_step_error() {
        let ctx = test_support::context_with_table(
            SchedulingDomain::Compute,
            "unrelated",
            "unrelated_table",
            vec![],
        );
        let filter = AvailabilityZoneFilter {
            params: AvailabilityZoneFilterParams::default(),
            knowledge: ctx.knowledge,
            handles: ctx.handles,
        };
        let mut request = test_support::request(&["node001"]);
        let _ = request
            .spec
            .insert("availability_zone".to_owned(), json!("az-a"));
        let err = filter
            .run(
                &test_support::tracer(),
                &request,
                &test_support::activations(&["node001"]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::UnknownHandle { .. }));
    }

    #[test]
    fn params_reject_unknown_fields() {
        let spec = StepSpec {
            plugin: AVAILABILITY_ZONE_FILTER_PLUGIN.to_owned(),
            name: None,
            params: json!({"zone_key": "az"}),
            knowledge: Vec::new(),
        };
        assert!(parse_params(&spec).is_err());
    }
}
