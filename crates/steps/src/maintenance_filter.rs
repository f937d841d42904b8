// SPDX-License-Identifier: Apache-2.0

//! Filters hosts that are in maintenance.
//!
//! Maintenance state comes from the `host-details` knowledge table. Hosts
//! missing from the table are kept: absence of knowledge is not evidence
//! of maintenance.

use crate::{HOST_DETAILS_HANDLE, fetch_handle_rows};
use async_trait::async_trait;
use cortex_config::SchedulingDomain;
use cortex_config::objects::StepSpec;
use cortex_engine::request::PlacementRequest;
use cortex_engine::step::{Activations, SchedulerStep, StepError, StepResult};
use cortex_engine::tracer::RunTracer;
use cortex_engine::{FILTER_FACTORIES, FilterFactory, StepContext, distributed_slice};
use cortex_store::{HandleTable, KnowledgeStore};
use std::collections::BTreeSet;
use std::sync::Arc;

/// The registered plugin name.
pub const MAINTENANCE_FILTER_PLUGIN: &str = "maintenance";

/// Filters hosts flagged as in maintenance.
pub struct MaintenanceFilter {
    knowledge: Arc<dyn KnowledgeStore>,
    handles: HandleTable,
}

#[async_trait]
impl SchedulerStep for MaintenanceFilter {
    async fn run(
        &self,
        _tracer: &RunTracer,
        _request: &PlacementRequest,
        activations: &Activations,
    ) -> Result<StepResult, StepError> {
        let rows = fetch_handle_rows(&self.knowledge, &self.handles, HOST_DETAILS_HANDLE).await?;
        let in_maintenance: BTreeSet<&str> = rows
            .iter()
            .filter(|row| row.get_bool("maintenance").unwrap_or(false))
            .filter_map(|row| row.get_str("host"))
            .collect();

        let mut result = StepResult::default();
        for host in activations.keys() {
            if !in_maintenance.contains(host.as_str()) {
                let _ = result.activations.insert(host.clone(), 0.0);
            }
        }
        Ok(result)
    }
}

fn create_maintenance_filter(
    ctx: &StepContext,
    _spec: &StepSpec,
) -> Result<Box<dyn SchedulerStep>, cortex_config::error::Error> {
    Ok(Box::new(MaintenanceFilter {
        knowledge: Arc::clone(&ctx.knowledge),
        handles: ctx.handles.clone(),
    }))
}

/// Register the maintenance filter for the compute domain.
#[allow(unsafe_code)]
#[distributed_slice(FILTER_FACTORIES)]
pub static MAINTENANCE_FILTER_FACTORY: FilterFactory = FilterFactory {
    plugin: MAINTENANCE_FILTER_PLUGIN,
    domains: &[SchedulingDomain::Compute],
    knowledge: &[HOST_DETAILS_HANDLE],
    create: create_maintenance_filter,
};
