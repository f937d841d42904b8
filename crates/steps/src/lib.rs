// SPDX-License-Identifier: Apache-2.0

//! Built-in filter and weigher plugins.
//!
//! Every plugin registers itself in the engine's factory tables at link
//! time; depending on this crate from the service binary is all it takes
//! to make the catalog available to declarative pipelines.
//!
//! Plugins read feature rows through named knowledge handles, never
//! through physical table names, so publishers can roll tables forward by
//! repointing the handle.

use cortex_engine::step::StepError;
use cortex_store::{HandleTable, KnowledgeStore, Row};
use std::sync::Arc;

pub mod availability_zone_filter;
pub mod capability_filter;
pub mod cpu_utilization_weigher;
pub mod host_residency_weigher;
pub mod maintenance_filter;
pub mod noop_filter;
pub mod pool_usage_weigher;
pub mod rebuild_affinity_filter;

/// Handle naming the host detail table (availability zone, traits,
/// maintenance state).
pub const HOST_DETAILS_HANDLE: &str = "host-details";

/// Handle naming the host CPU utilization table.
pub const HOST_UTILIZATION_HANDLE: &str = "host-utilization";

/// Handle naming the per-project host residency table.
pub const HOST_RESIDENCY_HANDLE: &str = "host-residency";

/// Handle naming the storage pool CPU usage table.
pub const POOL_USAGE_HANDLE: &str = "pool-usage";

/// Fetches all rows behind a knowledge handle.
pub(crate) async fn fetch_handle_rows(
    knowledge: &Arc<dyn KnowledgeStore>,
    handles: &HandleTable,
    handle: &str,
) -> Result<Vec<Row>, StepError> {
    let resolved = handles
        .resolve(handle)
        .ok_or_else(|| StepError::UnknownHandle {
            handle: handle.to_owned(),
        })?;
    Ok(knowledge.fetch(&resolved.table).await?)
}
