// SPDX-License-Identifier: Apache-2.0

//! Declarative capacity reservations.
//!
//! One reservation pre-commits capacity for one committed instance slot.
//! The reservation syncer owns every reservation whose `creator` matches
//! its identifier; it creates, patches, and deletes them as upstream
//! commitments and live workloads change.

use crate::objects::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A declarative capacity reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationObject {
    /// Object metadata; the name encodes the backing commitment and unit
    /// index, e.g. `commitment-4fa21-0`.
    pub metadata: ObjectMeta,
    /// The reserved capacity.
    pub spec: ReservationSpec,
}

/// The reserved capacity and its placement constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReservationSpec {
    /// Identifier of the controller that owns this reservation.
    pub creator: String,
    /// Placement constraints the scheduler applies when honoring the
    /// reservation.
    pub scheduler: SchedulerHint,
    /// The resources one reserved instance slot consumes.
    pub requests: ResourceRequests,
}

/// Scheduler-facing placement constraints, grouped per consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerHint {
    /// Constraints consumed by the compute scheduler.
    pub cortex_nova: SchedulerHintNova,
}

/// Placement constraints consumed by the compute scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerHintNova {
    /// Project the commitment belongs to.
    pub project_id: String,
    /// Identity domain of the project.
    pub domain_id: String,
    /// Flavor the commitment was made for.
    pub flavor_name: String,
    /// Extra specs of the committed flavor.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_specs: BTreeMap<String, String>,
}

/// The resources one reserved slot consumes.
///
/// Memory is a binary quantity (`Mi`); cpu is a plain decimal count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceRequests {
    /// Reserved memory, e.g. `4096Mi`.
    pub memory: String,
    /// Reserved vcpus, e.g. `8`.
    pub cpu: String,
}

impl ResourceRequests {
    /// Builds requests from a flavor's raw sizing.
    #[must_use]
    pub fn from_flavor_sizing(ram_mb: u64, vcpus: u64) -> Self {
        ResourceRequests {
            memory: format!("{ram_mb}Mi"),
            cpu: vcpus.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SchedulingDomain;

    #[test]
    fn requests_render_binary_memory_and_decimal_cpu() {
        let requests = ResourceRequests::from_flavor_sizing(4096, 8);
        assert_eq!(requests.memory, "4096Mi");
        assert_eq!(requests.cpu, "8");
    }

    #[test]
    fn round_trips() {
        let object = ReservationObject {
            metadata: ObjectMeta::new("commitment-4fa21-0", SchedulingDomain::Compute),
            spec: ReservationSpec {
                creator: "cortex-reservation-syncer".to_owned(),
                scheduler: SchedulerHint {
                    cortex_nova: SchedulerHintNova {
                        project_id: "p1".to_owned(),
                        domain_id: "d1".to_owned(),
                        flavor_name: "m1.large".to_owned(),
                        extra_specs: BTreeMap::from([(
                            "capabilities:hypervisor_type".to_owned(),
                            "qemu".to_owned(),
                        )]),
                    },
                },
                requests: ResourceRequests::from_flavor_sizing(8192, 4),
            },
        };
        let value = serde_json::to_value(&object).unwrap();
        let back: ReservationObject = serde_json::from_value(value).unwrap();
        assert_eq!(back, object);
    }
}
