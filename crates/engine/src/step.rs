// SPDX-License-Identifier: Apache-2.0

//! The step contract.
//!
//! A step is the atomic unit of a pipeline: either a filter (may remove
//! hosts) or a weigher (may only adjust scores). Both share one run
//! contract; the role only changes how the runtime interprets the result.
//!
//! Contract:
//! - A step must complete within the deadline carried by the tracer.
//! - A step must be deterministic up to the state of the knowledge store
//!   at the moment of invocation.
//! - Activation values are additive score deltas; non-finite values abort
//!   the run.

use crate::request::PlacementRequest;
use crate::tracer::RunTracer;
use async_trait::async_trait;
use cortex_config::HostId;
use std::collections::BTreeMap;
use std::fmt;

/// The surviving hosts at a point in the pipeline, with their running
/// score deltas.
pub type Activations = BTreeMap<HostId, f64>;

/// The role a step plays in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRole {
    /// May remove hosts and adjust scores.
    Filter,
    /// May only adjust scores.
    Weigher,
}

impl fmt::Display for StepRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepRole::Filter => f.write_str("filter"),
            StepRole::Weigher => f.write_str("weigher"),
        }
    }
}

/// The outcome of one step invocation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepResult {
    /// Hosts that remain in after this step, with the score delta the step
    /// assigns each of them. A host absent from this map is filtered out.
    pub activations: Activations,
    /// Optional per-host diagnostics, keyed by metric name. Never affects
    /// scoring; surfaced in structured logs only.
    pub statistics: BTreeMap<HostId, BTreeMap<String, f64>>,
}

impl StepResult {
    /// A result keeping every incoming host with a zero delta.
    #[must_use]
    pub fn passthrough(activations: &Activations) -> Self {
        StepResult {
            activations: activations.keys().map(|h| (h.clone(), 0.0)).collect(),
            statistics: BTreeMap::new(),
        }
    }

    /// A result from explicit host/delta pairs.
    #[must_use]
    pub fn from_deltas<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<HostId>,
    {
        StepResult {
            activations: deltas.into_iter().map(|(h, d)| (h.into(), d)).collect(),
            statistics: BTreeMap::new(),
        }
    }

    /// Records a diagnostic value for a host.
    pub fn record_statistic(&mut self, host: &str, metric: &str, value: f64) {
        let _ = self
            .statistics
            .entry(host.to_owned())
            .or_default()
            .insert(metric.to_owned(), value);
    }
}

/// Errors a step may report from its run.
#[derive(thiserror::Error, Debug)]
pub enum StepError {
    /// A knowledge-store read failed. Surfaced to the client; the client
    /// retries.
    #[error("knowledge store error: {0}")]
    Store(#[from] cortex_store::Error),

    /// The step referenced a knowledge handle that is not in the handle
    /// table.
    #[error("unknown knowledge handle `{handle}`")]
    UnknownHandle {
        /// The unresolved handle name.
        handle: String,
    },

    /// The request lacked data the step requires.
    #[error("invalid request: {details}")]
    InvalidRequest {
        /// A description of the missing or malformed data.
        details: String,
    },

    /// Any other step failure.
    #[error("{details}")]
    Other {
        /// A description of the failure.
        details: String,
    },
}

/// One pipeline step.
///
/// Implementations are shared across concurrent runs and must be
/// internally immutable; all per-run state lives in the arguments.
#[async_trait]
pub trait SchedulerStep: Send + Sync {
    /// Runs the step against the current activation set.
    async fn run(
        &self,
        tracer: &RunTracer,
        request: &PlacementRequest,
        activations: &Activations,
    ) -> Result<StepResult, StepError>;
}
