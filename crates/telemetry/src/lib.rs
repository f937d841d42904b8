// SPDX-License-Identifier: Apache-2.0

//! Telemetry plumbing for the scheduling engine.
//!
//! One process-wide prometheus registry carries every metric, prefixed
//! with `cortex` and stamped with the static labels from the monitoring
//! settings. The registry is exposed by the monitoring HTTP surface; this
//! crate only owns the instruments.

use prometheus::{Encoder, Registry, TextEncoder};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

pub mod error;
pub mod metrics;

pub use error::Error;
pub use metrics::{
    ApiMetrics, ControllerMetrics, DecisionMetrics, EngineMetrics, ReservationMetrics,
};

/// A cheaply clonable handle on the process-wide metric registry.
#[derive(Clone)]
pub struct MetricsHandle {
    registry: Arc<Registry>,
}

impl MetricsHandle {
    /// Creates a registry with the `cortex` prefix and the given static
    /// labels.
    pub fn new(labels: &BTreeMap<String, String>) -> Result<Self, Error> {
        let labels: HashMap<String, String> =
            labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let labels = if labels.is_empty() { None } else { Some(labels) };
        let registry = Registry::new_custom(Some("cortex".to_owned()), labels)
            .map_err(|e| Error::Registry {
                details: e.to_string(),
            })?;
        Ok(MetricsHandle {
            registry: Arc::new(registry),
        })
    }

    /// The underlying registry, for instrument registration.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders the registry in the prometheus text exposition format.
    pub fn render_text(&self) -> Result<String, Error> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| Error::Encode {
                details: e.to_string(),
            })?;
        String::from_utf8(buffer).map_err(|e| Error::Encode {
            details: e.to_string(),
        })
    }
}

/// Installs the process-wide tracing subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Safe to call
/// once per process; later calls are ignored.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_static_labels() {
        let labels = BTreeMap::from([("region".to_owned(), "qa-de-1".to_owned())]);
        let handle = MetricsHandle::new(&labels).unwrap();
        let api = ApiMetrics::new(&handle).unwrap();
        api.observe_request("compute", 200, std::time::Duration::from_millis(12));

        let text = handle.render_text().unwrap();
        assert!(text.contains("cortex_scheduler_requests_total"));
        assert!(text.contains("region=\"qa-de-1\""));
    }

    #[test]
    fn empty_labels_are_allowed() {
        let handle = MetricsHandle::new(&BTreeMap::new()).unwrap();
        assert!(handle.render_text().unwrap().is_empty());
    }
}
