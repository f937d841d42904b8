// SPDX-License-Identifier: Apache-2.0

//! Cortex scheduling engine configuration.
//!
//! Data Model:
//! - service settings (one bundle per process, merged from two JSON files)
//! - declarative objects consumed from the control plane
//!   - pipelines (ordered filter and weigher steps)
//!   - knowledge handles (feature tables plus readiness)
//!   - decisions (persisted pipeline outcomes)
//!   - reservations (pre-committed capacity)
//!
//! A process serves exactly one scheduling domain; objects declared for
//! other domains are ignored by every controller in this process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod conditions;
pub mod error;
pub mod objects;
pub mod settings;

/// Identifier of a candidate host as reported by the upstream scheduler.
pub type HostId = String;

/// Name of a declarative pipeline within a scheduling domain.
pub type PipelineName = String;

/// Name of a registered filter or weigher plugin.
pub type PluginName = String;

/// The scheduling domains an engine instance can serve.
///
/// A pipeline belongs to exactly one domain; the HTTP surface exposes one
/// endpoint per domain and requests never cross domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingDomain {
    /// Virtual machine placement (Nova).
    Compute,
    /// Shared filesystem placement (Manila).
    SharedFilesystem,
    /// Block storage placement (Cinder).
    BlockStorage,
}

impl SchedulingDomain {
    /// All domains, in a stable order usable for per-domain tables.
    pub const ALL: [SchedulingDomain; 3] = [
        SchedulingDomain::Compute,
        SchedulingDomain::SharedFilesystem,
        SchedulingDomain::BlockStorage,
    ];

    /// The canonical kebab-case name of the domain.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingDomain::Compute => "compute",
            SchedulingDomain::SharedFilesystem => "shared-filesystem",
            SchedulingDomain::BlockStorage => "block-storage",
        }
    }

    /// Stable index of the domain inside [`SchedulingDomain::ALL`].
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            SchedulingDomain::Compute => 0,
            SchedulingDomain::SharedFilesystem => 1,
            SchedulingDomain::BlockStorage => 2,
        }
    }

    /// The upstream service this domain schedules for.
    #[must_use]
    pub fn upstream_service(&self) -> &'static str {
        match self {
            SchedulingDomain::Compute => "nova",
            SchedulingDomain::SharedFilesystem => "manila",
            SchedulingDomain::BlockStorage => "cinder",
        }
    }
}

impl fmt::Display for SchedulingDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulingDomain {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compute" => Ok(SchedulingDomain::Compute),
            "shared-filesystem" => Ok(SchedulingDomain::SharedFilesystem),
            "block-storage" => Ok(SchedulingDomain::BlockStorage),
            other => Err(error::Error::UnknownDomain {
                value: other.to_owned(),
            }),
        }
    }
}
