// SPDX-License-Identifier: Apache-2.0

//! Per-run tracing context.
//!
//! One tracer accompanies one pipeline run. It carries the request id for
//! structured logs, the run deadline every step must respect, and the
//! cancellation token derived from the initiating request. Metric
//! recording goes through the tracer so the execution code stays free of
//! instrument plumbing.

use cortex_config::{PipelineName, SchedulingDomain};
use cortex_telemetry::EngineMetrics;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Context shared by every step of one pipeline run.
#[derive(Clone)]
pub struct RunTracer {
    request_id: String,
    pipeline: PipelineName,
    domain: SchedulingDomain,
    deadline: Instant,
    cancel: CancellationToken,
    metrics: Option<EngineMetrics>,
}

impl RunTracer {
    /// Creates a tracer whose deadline is `timeout` from now.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        pipeline: impl Into<PipelineName>,
        domain: SchedulingDomain,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        RunTracer {
            request_id: request_id.into(),
            pipeline: pipeline.into(),
            domain,
            deadline: Instant::now() + timeout,
            cancel,
            metrics: None,
        }
    }

    /// Attaches engine metrics; recorded per step and per run.
    #[must_use]
    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The request id this run serves.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The pipeline being run.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// The scheduling domain of the run.
    #[must_use]
    pub fn domain(&self) -> SchedulingDomain {
        self.domain
    }

    /// The instant at which the run must have completed.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The time budget left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Resolves when the initiating request is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Whether the initiating request is already cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn record_step(&self, step: &str, duration: Duration, removed: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_step(&self.pipeline, step, duration, removed);
        }
    }

    pub(crate) fn record_run(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_run(&self.pipeline, outcome);
        }
    }
}
