// SPDX-License-Identifier: Apache-2.0

//! Placement requests.
//!
//! The request body is the shape the upstream native scheduler posts: an
//! opaque spec bundle, the candidate hosts, and the weights the native
//! scheduler assigned before this hop.

use crate::error::Error;
use cortex_config::HostId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One candidate host as reported by the upstream scheduler.
///
/// Everything beyond the identifier is carried opaquely and available to
/// steps that know the upstream schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateHost {
    /// The host identifier; keys the weight map.
    pub host_id: HostId,
    /// Upstream-specific extras (hypervisor hostname, cell, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A placement request as posted by Nova, Manila, or Cinder.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlacementRequest {
    /// Opaque spec bundle keyed by the upstream service's schema (flavor
    /// details, image properties, scheduler hints, ...).
    #[serde(default)]
    pub spec: serde_json::Map<String, serde_json::Value>,
    /// Opaque request context from the upstream service.
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    /// The candidate hosts, in upstream order.
    #[serde(default)]
    pub hosts: Vec<CandidateHost>,
    /// Initial per-host weights from the upstream native scheduler.
    #[serde(default)]
    pub weights: HashMap<HostId, f64>,
    /// The pipeline to run; empty selects the domain default.
    #[serde(default)]
    pub pipeline: String,
    /// Whether this request re-schedules an existing workload.
    #[serde(default)]
    pub rebuild: bool,
}

impl PlacementRequest {
    /// Validates the host/weight correspondence invariant: every candidate
    /// host has a weight, every weight names a candidate host, hosts are
    /// unique, and all weights are finite.
    pub fn validate(&self) -> Result<(), Error> {
        if self.hosts.is_empty() {
            return Err(Error::InvalidRequest {
                details: "no candidate hosts".to_owned(),
            });
        }
        let mut seen = BTreeSet::new();
        for host in &self.hosts {
            if host.host_id.is_empty() {
                return Err(Error::InvalidRequest {
                    details: "empty host identifier".to_owned(),
                });
            }
            if !seen.insert(host.host_id.as_str()) {
                return Err(Error::InvalidRequest {
                    details: format!("duplicate candidate host `{}`", host.host_id),
                });
            }
            match self.weights.get(&host.host_id) {
                None => {
                    return Err(Error::InvalidRequest {
                        details: format!("host `{}` has no weight", host.host_id),
                    });
                }
                Some(weight) if !weight.is_finite() => {
                    return Err(Error::InvalidRequest {
                        details: format!("non-finite weight for host `{}`", host.host_id),
                    });
                }
                Some(_) => {}
            }
        }
        for host in self.weights.keys() {
            if !seen.contains(host.as_str()) {
                return Err(Error::InvalidRequest {
                    details: format!("weight for unknown host `{host}`"),
                });
            }
        }
        Ok(())
    }

    /// The identifier of the resource being scheduled.
    ///
    /// Tries the conventional spec and context keys; falls back to a fresh
    /// uuid so decision records can always be keyed.
    #[must_use]
    pub fn resource_id(&self) -> String {
        for (bundle, key) in [
            (&self.spec, "instance_uuid"),
            (&self.spec, "id"),
            (&self.context, "global_request_id"),
        ] {
            if let Some(value) = bundle.get(key).and_then(|v| v.as_str()) {
                if !value.is_empty() {
                    return value.to_owned();
                }
            }
        }
        uuid::Uuid::new_v4().to_string()
    }

    /// A stable digest of the opaque spec bundle.
    ///
    /// Keys of a JSON object serialize in sorted order, so semantically
    /// equal bundles digest equally.
    #[must_use]
    pub fn spec_digest(&self) -> String {
        let canonical = serde_json::to_vec(&self.spec).unwrap_or_default();
        blake3::hash(&canonical).to_hex().to_string()
    }
}
