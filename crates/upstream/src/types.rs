// SPDX-License-Identifier: Apache-2.0

//! Upstream resource shapes consumed by the reservation syncer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A capacity commitment from the upstream commitment service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// The commitment uuid.
    pub uuid: String,
    /// The service the commitment applies to, e.g. `compute`.
    pub service_type: String,
    /// The committed resource, e.g. `instances_m1.large`.
    pub resource_name: String,
    /// How many units are committed.
    pub amount: u64,
    /// The project the commitment belongs to.
    pub project_id: String,
}

impl Commitment {
    /// The flavor name a per-instance commitment refers to, if this is
    /// one.
    #[must_use]
    pub fn instance_flavor(&self) -> Option<&str> {
        self.resource_name.strip_prefix("instances_")
    }
}

/// A project known to the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// The project id.
    pub id: String,
    /// The identity domain the project lives in.
    pub domain_id: String,
}

/// A compute flavor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    /// The flavor name.
    pub name: String,
    /// Number of vcpus.
    pub vcpus: u64,
    /// Memory in MiB.
    pub ram_mb: u64,
    /// Flavor extra specs.
    #[serde(default)]
    pub extra_specs: BTreeMap<String, String>,
}

impl Flavor {
    /// The hypervisor family this flavor declares, if any.
    #[must_use]
    pub fn hypervisor_type(&self) -> Option<&str> {
        self.extra_specs
            .get("capabilities:hypervisor_type")
            .map(String::as_str)
    }
}

/// A live server as reported by the compute service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// The server id.
    pub id: String,
    /// The project the server belongs to.
    pub project_id: String,
    /// The flavor the server was built from.
    pub flavor_name: String,
}
