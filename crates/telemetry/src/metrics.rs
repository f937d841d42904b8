// SPDX-License-Identifier: Apache-2.0

//! Metric sets, one struct per subsystem.
//!
//! Each set owns its instruments and registers them on construction, so a
//! subsystem cannot emit before its metrics exist. Label cardinality is
//! bounded: domains and pipeline names are operator-controlled, never
//! request-controlled.

use crate::{Error, MetricsHandle};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
};
use std::time::Duration;

fn register(
    handle: &MetricsHandle,
    collector: Box<dyn prometheus::core::Collector>,
) -> Result<(), Error> {
    handle
        .registry()
        .register(collector)
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })
}

/// Request metrics of the scheduling HTTP surface.
#[derive(Clone)]
pub struct ApiMetrics {
    requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
}

impl ApiMetrics {
    /// Creates and registers the set.
    pub fn new(handle: &MetricsHandle) -> Result<Self, Error> {
        let requests_total = IntCounterVec::new(
            Opts::new(
                "scheduler_requests_total",
                "Placement requests served, by domain and response status.",
            ),
            &["domain", "status"],
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "scheduler_request_duration_seconds",
                "End-to-end placement request duration, by domain.",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["domain"],
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        register(handle, Box::new(requests_total.clone()))?;
        register(handle, Box::new(request_duration_seconds.clone()))?;
        Ok(ApiMetrics {
            requests_total,
            request_duration_seconds,
        })
    }

    /// Records one served request.
    pub fn observe_request(&self, domain: &str, status: u16, duration: Duration) {
        self.requests_total
            .with_label_values(&[domain, &status.to_string()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[domain])
            .observe(duration.as_secs_f64());
    }
}

/// Pipeline execution metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    runs_total: IntCounterVec,
    step_duration_seconds: HistogramVec,
    hosts_removed_total: IntCounterVec,
}

impl EngineMetrics {
    /// Creates and registers the set.
    pub fn new(handle: &MetricsHandle) -> Result<Self, Error> {
        let runs_total = IntCounterVec::new(
            Opts::new(
                "pipeline_runs_total",
                "Pipeline runs, by pipeline and outcome.",
            ),
            &["pipeline", "outcome"],
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        let step_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "pipeline_step_duration_seconds",
                "Duration of one step invocation, by pipeline and step.",
            )
            .buckets(vec![0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["pipeline", "step"],
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        let hosts_removed_total = IntCounterVec::new(
            Opts::new(
                "pipeline_hosts_removed_total",
                "Hosts removed by filter steps, by pipeline and step.",
            ),
            &["pipeline", "step"],
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        register(handle, Box::new(runs_total.clone()))?;
        register(handle, Box::new(step_duration_seconds.clone()))?;
        register(handle, Box::new(hosts_removed_total.clone()))?;
        Ok(EngineMetrics {
            runs_total,
            step_duration_seconds,
            hosts_removed_total,
        })
    }

    /// Records a completed run.
    pub fn observe_run(&self, pipeline: &str, outcome: &str) {
        self.runs_total.with_label_values(&[pipeline, outcome]).inc();
    }

    /// Records one step invocation.
    pub fn observe_step(&self, pipeline: &str, step: &str, duration: Duration, removed: usize) {
        self.step_duration_seconds
            .with_label_values(&[pipeline, step])
            .observe(duration.as_secs_f64());
        if removed > 0 {
            self.hosts_removed_total
                .with_label_values(&[pipeline, step])
                .inc_by(removed as u64);
        }
    }
}

/// Readiness controller metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    pipeline_ready: IntGaugeVec,
    reconciliations_total: IntCounterVec,
}

impl ControllerMetrics {
    /// Creates and registers the set.
    pub fn new(handle: &MetricsHandle) -> Result<Self, Error> {
        let pipeline_ready = IntGaugeVec::new(
            Opts::new(
                "pipeline_ready",
                "Whether a pipeline is in the live registry (1) or not (0).",
            ),
            &["pipeline"],
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        let reconciliations_total = IntCounterVec::new(
            Opts::new(
                "controller_reconciliations_total",
                "Reconcile passes, by object kind and outcome.",
            ),
            &["kind", "outcome"],
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        register(handle, Box::new(pipeline_ready.clone()))?;
        register(handle, Box::new(reconciliations_total.clone()))?;
        Ok(ControllerMetrics {
            pipeline_ready,
            reconciliations_total,
        })
    }

    /// Sets the readiness gauge of a pipeline.
    pub fn set_pipeline_ready(&self, pipeline: &str, ready: bool) {
        self.pipeline_ready
            .with_label_values(&[pipeline])
            .set(i64::from(ready));
    }

    /// Drops the readiness gauge of a deleted pipeline.
    pub fn forget_pipeline(&self, pipeline: &str) {
        // Removing an unknown label set is fine.
        let _ = self.pipeline_ready.remove_label_values(&[pipeline]);
    }

    /// Records one reconcile pass.
    pub fn observe_reconciliation(&self, kind: &str, outcome: &str) {
        self.reconciliations_total
            .with_label_values(&[kind, outcome])
            .inc();
    }
}

/// Reservation syncer metrics.
#[derive(Clone)]
pub struct ReservationMetrics {
    sync_runs_total: IntCounterVec,
    reservations: IntGauge,
    commitments_skipped_total: IntCounterVec,
}

impl ReservationMetrics {
    /// Creates and registers the set.
    pub fn new(handle: &MetricsHandle) -> Result<Self, Error> {
        let sync_runs_total = IntCounterVec::new(
            Opts::new("reservation_sync_runs_total", "Sync ticks, by outcome."),
            &["outcome"],
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        let reservations = IntGauge::new(
            "reservations",
            "Reservations currently owned by this syncer.",
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        let commitments_skipped_total = IntCounterVec::new(
            Opts::new(
                "reservation_commitments_skipped_total",
                "Commitments skipped during planning, by reason.",
            ),
            &["reason"],
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        register(handle, Box::new(sync_runs_total.clone()))?;
        register(handle, Box::new(reservations.clone()))?;
        register(handle, Box::new(commitments_skipped_total.clone()))?;
        Ok(ReservationMetrics {
            sync_runs_total,
            reservations,
            commitments_skipped_total,
        })
    }

    /// Records one sync tick.
    pub fn observe_sync(&self, outcome: &str, owned: Option<usize>) {
        self.sync_runs_total.with_label_values(&[outcome]).inc();
        if let Some(owned) = owned {
            self.reservations.set(owned as i64);
        }
    }

    /// Records one skipped commitment.
    pub fn observe_skip(&self, reason: &str) {
        self.commitments_skipped_total
            .with_label_values(&[reason])
            .inc();
    }
}

/// Decision writer metrics.
#[derive(Clone)]
pub struct DecisionMetrics {
    enqueued_total: IntCounter,
    dropped_total: IntCounter,
    persisted_total: IntCounter,
    failed_total: IntCounter,
}

impl DecisionMetrics {
    /// Creates and registers the set.
    pub fn new(handle: &MetricsHandle) -> Result<Self, Error> {
        let enqueued_total = IntCounter::new(
            "decisions_enqueued_total",
            "Decision records accepted into the queue.",
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        let dropped_total = IntCounter::new(
            "decisions_dropped_total",
            "Decision records dropped because the queue was full.",
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        let persisted_total = IntCounter::new(
            "decisions_persisted_total",
            "Decision records persisted to the control plane.",
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        let failed_total = IntCounter::new(
            "decisions_failed_total",
            "Decision records that failed to persist and were dropped.",
        )
        .map_err(|e| Error::Registration {
            details: e.to_string(),
        })?;
        register(handle, Box::new(enqueued_total.clone()))?;
        register(handle, Box::new(dropped_total.clone()))?;
        register(handle, Box::new(persisted_total.clone()))?;
        register(handle, Box::new(failed_total.clone()))?;
        Ok(DecisionMetrics {
            enqueued_total,
            dropped_total,
            persisted_total,
            failed_total,
        })
    }

    /// Records an accepted enqueue.
    pub fn observe_enqueued(&self) {
        self.enqueued_total.inc();
    }

    /// Records a dropped record (full queue).
    pub fn observe_dropped(&self) {
        self.dropped_total.inc();
    }

    /// Records a persisted record.
    pub fn observe_persisted(&self) {
        self.persisted_total.inc();
    }

    /// Records a failed persistence attempt.
    pub fn observe_failed(&self) {
        self.failed_total.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn handle() -> MetricsHandle {
        MetricsHandle::new(&BTreeMap::new()).unwrap()
    }

    #[test]
    fn all_sets_register_on_one_registry() {
        let handle = handle();
        let _api = ApiMetrics::new(&handle).unwrap();
        let _engine = EngineMetrics::new(&handle).unwrap();
        let _controller = ControllerMetrics::new(&handle).unwrap();
        let _reservations = ReservationMetrics::new(&handle).unwrap();
        let _decisions = DecisionMetrics::new(&handle).unwrap();
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let handle = handle();
        let _first = ApiMetrics::new(&handle).unwrap();
        assert!(ApiMetrics::new(&handle).is_err());
    }

    #[test]
    fn forget_pipeline_drops_the_gauge() {
        let handle = handle();
        let controller = ControllerMetrics::new(&handle).unwrap();
        controller.set_pipeline_ready("default", true);
        assert!(handle.render_text().unwrap().contains("default"));
        controller.forget_pipeline("default");
        assert!(!handle.render_text().unwrap().contains("default"));
    }

    #[test]
    fn engine_metrics_count_removed_hosts() {
        let handle = handle();
        let engine = EngineMetrics::new(&handle).unwrap();
        engine.observe_step("default", "maintenance", Duration::from_millis(1), 2);
        engine.observe_run("default", "success");
        let text = handle.render_text().unwrap();
        assert!(text.contains("cortex_pipeline_hosts_removed_total"));
    }
}
