// SPDX-License-Identifier: Apache-2.0

//! Pipeline execution.
//!
//! A built pipeline runs its filter steps in declared order, then its
//! weigher steps in declared order. Steps emit additive score deltas;
//! filters shrink the candidate set by omission, weighers must not. The
//! final ordering sorts by score descending with lexical ascending host id
//! as the tie-break, so equal-scored results are portable across runs and
//! processes.

use crate::error::Error;
use crate::request::PlacementRequest;
use crate::step::{Activations, SchedulerStep, StepRole};
use crate::tracer::RunTracer;
use cortex_config::objects::StepDeltas;
use cortex_config::{HostId, PipelineName, SchedulingDomain};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use tokio::time::Instant;
use tracing::{debug, trace};

/// A step bound into a pipeline, with its resolved identity.
pub struct BoundStep {
    /// The step's effective name within the pipeline.
    pub name: String,
    /// The plugin the step was created from.
    pub plugin: String,
    /// Whether the step filters or weighs.
    pub role: StepRole,
    pub(crate) step: Box<dyn SchedulerStep>,
}

/// A fully built pipeline, owned by the live registry.
pub struct BuiltPipeline {
    /// The pipeline name.
    pub name: PipelineName,
    /// The scheduling domain the pipeline serves.
    pub domain: SchedulingDomain,
    /// Whether runs enqueue decision records.
    pub create_decisions: bool,
    /// The knowledge handles the pipeline depends on.
    pub knowledge: BTreeSet<String>,
    pub(crate) filters: Vec<BoundStep>,
    pub(crate) weighers: Vec<BoundStep>,
}

/// The outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    /// Surviving hosts, best first.
    pub ordered_hosts: Vec<HostId>,
    /// Final score per surviving host.
    pub scores: BTreeMap<HostId, f64>,
    /// The delta each step applied to each host surviving that step.
    pub per_step_deltas: Vec<StepDeltas>,
}

impl BuiltPipeline {
    /// The step names in execution order, for diagnostics.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.filters
            .iter()
            .chain(&self.weighers)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Runs the pipeline against a validated request.
    ///
    /// The request must have passed
    /// [`PlacementRequest::validate`](crate::request::PlacementRequest::validate);
    /// hosts without weights would silently disappear otherwise.
    pub async fn run(
        &self,
        tracer: &RunTracer,
        request: &PlacementRequest,
    ) -> Result<RunOutput, Error> {
        let mut scores: Activations = request
            .hosts
            .iter()
            .filter_map(|h| {
                request
                    .weights
                    .get(&h.host_id)
                    .map(|w| (h.host_id.clone(), *w))
            })
            .collect();
        let mut per_step_deltas = Vec::with_capacity(self.filters.len() + self.weighers.len());

        for step in &self.filters {
            let result = self.invoke(step, tracer, request, &scores).await?;
            self.check_finite(tracer, step, &result.activations)?;

            let before = scores.len();
            scores.retain(|host, _| result.activations.contains_key(host));
            let removed = before - scores.len();

            let mut applied = BTreeMap::new();
            for (host, score) in &mut scores {
                // Validated above: every surviving host is in the result.
                if let Some(delta) = result.activations.get(host) {
                    *score += delta;
                    let _ = applied.insert(host.clone(), *delta);
                }
            }
            trace_statistics(tracer, &step.name, &result.statistics);
            tracer.record_step(&step.name, result.elapsed, removed);
            per_step_deltas.push(StepDeltas {
                step: step.name.clone(),
                deltas: applied,
            });

            if scores.is_empty() {
                debug!(
                    request_id = tracer.request_id(),
                    pipeline = %self.name,
                    step = %step.name,
                    "all candidates filtered out, short-circuiting"
                );
                tracer.record_run("empty");
                return Ok(RunOutput {
                    ordered_hosts: Vec::new(),
                    scores,
                    per_step_deltas,
                });
            }
        }

        for step in &self.weighers {
            let result = self.invoke(step, tracer, request, &scores).await?;
            self.check_finite(tracer, step, &result.activations)?;

            let missing: Vec<HostId> = scores
                .keys()
                .filter(|host| !result.activations.contains_key(*host))
                .cloned()
                .collect();
            if !missing.is_empty() {
                tracer.record_run("error");
                return Err(Error::WeigherRemovedHosts {
                    pipeline: self.name.clone(),
                    step: step.name.clone(),
                    hosts: missing,
                });
            }

            let mut applied = BTreeMap::new();
            for (host, score) in &mut scores {
                if let Some(delta) = result.activations.get(host) {
                    *score += delta;
                    let _ = applied.insert(host.clone(), *delta);
                }
            }
            trace_statistics(tracer, &step.name, &result.statistics);
            tracer.record_step(&step.name, result.elapsed, 0);
            per_step_deltas.push(StepDeltas {
                step: step.name.clone(),
                deltas: applied,
            });
        }

        let mut ordered: Vec<(HostId, f64)> = scores
            .iter()
            .map(|(host, score)| (host.clone(), *score))
            .collect();
        ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        tracer.record_run("success");
        Ok(RunOutput {
            ordered_hosts: ordered.into_iter().map(|(host, _)| host).collect(),
            scores,
            per_step_deltas,
        })
    }

    async fn invoke(
        &self,
        step: &BoundStep,
        tracer: &RunTracer,
        request: &PlacementRequest,
        activations: &Activations,
    ) -> Result<TimedResult, Error> {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = tracer.cancelled() => {
                tracer.record_run("cancelled");
                return Err(Error::Cancelled);
            }
            () = tokio::time::sleep_until(tracer.deadline()) => {
                tracer.record_run("timeout");
                return Err(Error::StepTimeout {
                    pipeline: self.name.clone(),
                    step: step.name.clone(),
                });
            }
            result = step.step.run(tracer, request, activations) => result,
        };
        match result {
            Ok(result) => Ok(TimedResult {
                activations: result.activations,
                statistics: result.statistics,
                elapsed: started.elapsed(),
            }),
            Err(source) => {
                tracer.record_run("error");
                Err(Error::StepFailed {
                    pipeline: self.name.clone(),
                    step: step.name.clone(),
                    source,
                })
            }
        }
    }

    fn check_finite(
        &self,
        tracer: &RunTracer,
        step: &BoundStep,
        activations: &Activations,
    ) -> Result<(), Error> {
        for (host, value) in activations {
            if !value.is_finite() {
                tracer.record_run("error");
                return Err(Error::NonFiniteDelta {
                    pipeline: self.name.clone(),
                    step: step.name.clone(),
                    host: host.clone(),
                    value: *value,
                });
            }
        }
        Ok(())
    }
}

struct TimedResult {
    activations: Activations,
    statistics: BTreeMap<HostId, BTreeMap<String, f64>>,
    elapsed: std::time::Duration,
}

fn trace_statistics(
    tracer: &RunTracer,
    step: &str,
    statistics: &BTreeMap<HostId, BTreeMap<String, f64>>,
) {
    if statistics.is_empty() {
        return;
    }
    trace!(
        request_id = tracer.request_id(),
        pipeline = tracer.pipeline(),
        step,
        statistics = ?statistics,
        "step statistics"
    );
}
