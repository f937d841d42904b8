// SPDX-License-Identifier: Apache-2.0

//! Process-wide service settings.
//!
//! The bundle is assembled from two JSON files merged deep-right: a base
//! document (`/etc/config/conf.json`) and a secrets overlay
//! (`/etc/secrets/secrets.json`). Objects merge recursively; any other
//! value in the overlay replaces the base value. A missing or unreadable
//! base file is fatal at startup; a missing overlay is tolerated so
//! development processes can run from a single file.

use crate::error::Error;
use crate::objects::{KnowledgeObject, PipelineObject};
use crate::{PipelineName, SchedulingDomain};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default location of the base configuration document.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/config/conf.json";

/// Default location of the secrets overlay document.
pub const DEFAULT_SECRETS_PATH: &str = "/etc/secrets/secrets.json";

/// The controllers a process can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerKind {
    /// Dependency & readiness controller for scheduling pipelines.
    Scheduling,
    /// Reservation syncer converting commitments into reservations.
    Reservations,
    /// Decision writer draining the decision queue.
    Decisions,
}

impl ControllerKind {
    /// All controllers, the default for `enabled_controllers`.
    pub const ALL: [ControllerKind; 3] = [
        ControllerKind::Scheduling,
        ControllerKind::Reservations,
        ControllerKind::Decisions,
    ];
}

/// The process-wide configuration bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSettings {
    /// The scheduling domain this instance serves. Declarative objects from
    /// other domains are ignored.
    pub scheduling_domain: SchedulingDomain,
    /// Upstream service URLs, keyed by catalog service type (`identity`,
    /// `compute`, `resources`). The identity entry is required when the
    /// reservation syncer runs; other services fall back to the identity
    /// catalog when not listed.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    /// Credential handle for the identity gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_secret_ref: Option<String>,
    /// Optional client-certificate credential handle for mutual TLS towards
    /// upstream services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_secret_ref: Option<String>,
    /// Monitoring surface settings.
    #[serde(default)]
    pub monitoring: MonitoringSettings,
    /// The controllers to activate in this process.
    #[serde(default = "default_enabled_controllers")]
    pub enabled_controllers: Vec<ControllerKind>,
    /// Scheduling API settings.
    #[serde(default)]
    pub api: ApiSettings,
    /// Decision queue settings.
    #[serde(default)]
    pub decisions: DecisionSettings,
    /// Reservation syncer settings.
    #[serde(default)]
    pub reservations: ReservationSettings,
    /// Upstream client settings.
    #[serde(default)]
    pub upstream: UpstreamSettings,
    /// Declarative objects applied to the control plane at startup.
    #[serde(default)]
    pub bootstrap: BootstrapObjects,
}

fn default_enabled_controllers() -> Vec<ControllerKind> {
    ControllerKind::ALL.to_vec()
}

/// Monitoring (MetricsSink) surface settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringSettings {
    /// Port the metrics/health server binds on all interfaces.
    pub port: u16,
    /// Static labels applied to every emitted metric.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        MonitoringSettings {
            port: 2112,
            labels: BTreeMap::new(),
        }
    }
}

/// Scheduling API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSettings {
    /// Address the scheduling API binds, e.g. `0.0.0.0:8080`.
    pub bind_address: String,
    /// Default pipeline per domain, used when a request leaves the
    /// pipeline name empty.
    #[serde(default)]
    pub default_pipelines: BTreeMap<SchedulingDomain, PipelineName>,
    /// Deadline for one pipeline run, propagated to every step.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            bind_address: "0.0.0.0:8080".to_owned(),
            default_pipelines: BTreeMap::new(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Decision queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionSettings {
    /// Capacity of the decision queue. A full queue drops records rather
    /// than blocking the response path.
    pub queue_capacity: usize,
}

impl Default for DecisionSettings {
    fn default() -> Self {
        DecisionSettings { queue_capacity: 256 }
    }
}

/// Reservation syncer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReservationSettings {
    /// Interval between sync ticks.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Creator identifier stamped on every reservation this syncer owns.
    pub creator: String,
    /// Hypervisor families whose flavors may be reserved. A flavor that
    /// declares a family outside this list is dropped.
    pub hypervisor_types: Vec<String>,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        ReservationSettings {
            interval: Duration::from_secs(300),
            creator: "cortex-reservation-syncer".to_owned(),
            hypervisor_types: vec!["qemu".to_owned(), "vmware".to_owned()],
        }
    }
}

/// Upstream client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamSettings {
    /// Base delay inserted before every upstream call; a random jitter of
    /// up to half this value is added on top.
    #[serde(with = "humantime_serde")]
    pub request_delay: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        UpstreamSettings {
            request_delay: Duration::from_millis(50),
        }
    }
}

/// Declarative objects applied to the control plane at startup, so a fresh
/// process can serve a default pipeline without an external seeding step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapObjects {
    /// Pipelines applied at startup.
    #[serde(default)]
    pub pipelines: Vec<PipelineObject>,
    /// Knowledge handles applied at startup.
    #[serde(default)]
    pub knowledge: Vec<KnowledgeObject>,
}

impl ServiceSettings {
    /// Loads the bundle from `config_path`, overlaying `secrets_path` if it
    /// exists, and validates the result.
    pub fn load(config_path: &Path, secrets_path: &Path) -> Result<Self, Error> {
        let mut document = read_json(config_path)?;
        match std::fs::read_to_string(secrets_path) {
            Ok(raw) => {
                let overlay = parse_json(secrets_path, &raw)?;
                merge_right(&mut document, overlay);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::FileReadError {
                    path: secrets_path.display().to_string(),
                    details: e.to_string(),
                });
            }
        }
        let settings: ServiceSettings =
            serde_json::from_value(document).map_err(|e| Error::DeserializationError {
                path: config_path.display().to_string(),
                format: "JSON".to_owned(),
                details: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates cross-field invariants the type system cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        if self.api.request_timeout.is_zero() {
            errors.push(Error::InvalidSetting {
                setting: "api.request_timeout".to_owned(),
                details: "must be greater than zero".to_owned(),
            });
        }
        if self.decisions.queue_capacity == 0 {
            errors.push(Error::InvalidSetting {
                setting: "decisions.queue_capacity".to_owned(),
                details: "must be greater than zero".to_owned(),
            });
        }
        if self.reservations.interval.is_zero() {
            errors.push(Error::InvalidSetting {
                setting: "reservations.interval".to_owned(),
                details: "must be greater than zero".to_owned(),
            });
        }
        for object in &self.bootstrap.pipelines {
            if let Err(e) = object.validate() {
                errors.push(e);
            }
        }
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.swap_remove(0)),
            _ => Err(Error::InvalidConfiguration { errors }),
        }
    }

    /// The default pipeline for a domain, if one is configured.
    #[must_use]
    pub fn default_pipeline(&self, domain: SchedulingDomain) -> Option<&str> {
        self.api.default_pipelines.get(&domain).map(String::as_str)
    }
}

/// Merges `overlay` into `base`, right-hand side winning. JSON objects are
/// merged recursively; every other value type is replaced wholesale.
pub fn merge_right(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_right(existing, value),
                    None => {
                        let _ = base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value, Error> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::FileReadError {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;
    parse_json(path, &raw)
}

fn parse_json(path: &Path, raw: &str) -> Result<serde_json::Value, Error> {
    serde_json::from_str(raw).map_err(|e| Error::DeserializationError {
        path: path.display().to_string(),
        format: "JSON".to_owned(),
        details: e.to_string(),
    })
}
