// SPDX-License-Identifier: Apache-2.0

//! Test utilities for the pipeline runtime.
//!
//! Deterministic step doubles plus ready-made factories, used by the
//! engine's own tests and by the controller and API test suites.

use crate::request::PlacementRequest;
use crate::step::{Activations, SchedulerStep, StepError, StepResult, StepRole};
use crate::tracer::RunTracer;
use crate::{FilterFactory, StepContext, WeigherFactory};
use async_trait::async_trait;
use cortex_config::{HostId, SchedulingDomain};
use cortex_store::{HandleTable, MemoryKnowledgeStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// What a scripted step does when run.
#[derive(Debug, Clone)]
pub enum StepBehavior {
    /// Keep every incoming host, adding a constant delta.
    Echo {
        /// The delta added to every host.
        delta: f64,
    },
    /// Keep exactly the listed hosts (intersected with the incoming set),
    /// adding the listed deltas. Hosts not listed are filtered out.
    Keep {
        /// Hosts to keep, with their deltas.
        deltas: BTreeMap<HostId, f64>,
    },
    /// Keep every incoming host; hosts listed get their delta, others get
    /// zero. Extra listed hosts are emitted as-is (the runtime ignores
    /// additions for unknown hosts).
    Deltas {
        /// Deltas per host.
        deltas: BTreeMap<HostId, f64>,
    },
    /// Fail with the given details.
    Fail {
        /// The failure message.
        details: String,
    },
    /// Sleep, then behave like `Echo { delta: 0.0 }`.
    Sleep {
        /// How long to sleep before answering.
        duration: Duration,
    },
}

/// A deterministic scripted step.
#[derive(Debug, Clone)]
pub struct ScriptedStep {
    behavior: StepBehavior,
}

impl ScriptedStep {
    /// Creates a step with the given behavior.
    #[must_use]
    pub fn new(behavior: StepBehavior) -> Self {
        ScriptedStep { behavior }
    }
}

#[async_trait]
impl SchedulerStep for ScriptedStep {
    async fn run(
        &self,
        _tracer: &RunTracer,
        _request: &PlacementRequest,
        activations: &Activations,
    ) -> Result<StepResult, StepError> {
        match &self.behavior {
            StepBehavior::Echo { delta } => Ok(StepResult {
                activations: activations.keys().map(|h| (h.clone(), *delta)).collect(),
                statistics: BTreeMap::new(),
            }),
            StepBehavior::Keep { deltas } => Ok(StepResult {
                activations: deltas
                    .iter()
                    .filter(|(host, _)| activations.contains_key(*host))
                    .map(|(host, delta)| (host.clone(), *delta))
                    .collect(),
                statistics: BTreeMap::new(),
            }),
            StepBehavior::Deltas { deltas } => {
                let mut result: Activations = activations
                    .keys()
                    .map(|h| (h.clone(), deltas.get(h).copied().unwrap_or(0.0)))
                    .collect();
                for (host, delta) in deltas {
                    let _ = result.entry(host.clone()).or_insert(*delta);
                }
                Ok(StepResult {
                    activations: result,
                    statistics: BTreeMap::new(),
                })
            }
            StepBehavior::Fail { details } => Err(StepError::Other {
                details: details.clone(),
            }),
            StepBehavior::Sleep { duration } => {
                tokio::time::sleep(*duration).await;
                Ok(StepResult::passthrough(activations))
            }
        }
    }
}

/// Binds a scripted step under a name, for direct pipeline construction.
#[must_use]
pub fn bound_step(name: &str, role: StepRole, behavior: StepBehavior) -> crate::pipeline::BoundStep {
    crate::pipeline::BoundStep {
        name: name.to_owned(),
        plugin: name.to_owned(),
        role,
        step: Box::new(ScriptedStep::new(behavior)),
    }
}

/// Assembles a pipeline directly from bound steps, bypassing the builder.
#[must_use]
pub fn built_pipeline(
    name: &str,
    domain: SchedulingDomain,
    create_decisions: bool,
    filters: Vec<crate::pipeline::BoundStep>,
    weighers: Vec<crate::pipeline::BoundStep>,
) -> crate::pipeline::BuiltPipeline {
    crate::pipeline::BuiltPipeline {
        name: name.to_owned(),
        domain,
        create_decisions,
        knowledge: BTreeSet::new(),
        filters,
        weighers,
    }
}

/// A step context over an empty in-memory knowledge store.
#[must_use]
pub fn test_context(domain: SchedulingDomain) -> StepContext {
    StepContext {
        domain,
        knowledge: Arc::new(MemoryKnowledgeStore::new()),
        handles: HandleTable::new(),
    }
}

/// A filter factory named `echo-filter`, valid in every domain.
#[must_use]
pub fn echo_filter_factory() -> FilterFactory {
    FilterFactory {
        plugin: "echo-filter",
        domains: &SchedulingDomain::ALL,
        knowledge: &[],
        create: |_ctx, _spec| Ok(Box::new(ScriptedStep::new(StepBehavior::Echo { delta: 0.0 }))),
    }
}

/// A weigher factory named `echo-weigher`, valid in every domain.
#[must_use]
pub fn echo_weigher_factory() -> WeigherFactory {
    WeigherFactory {
        plugin: "echo-weigher",
        domains: &SchedulingDomain::ALL,
        knowledge: &[],
        create: |_ctx, spec| {
            let delta = spec
                .params
                .get("delta")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0);
            Ok(Box::new(ScriptedStep::new(StepBehavior::Echo { delta })))
        },
    }
}

/// A filter factory named `sleep-filter` that sleeps for one minute.
#[must_use]
pub fn sleep_filter_factory() -> FilterFactory {
    FilterFactory {
        plugin: "sleep-filter",
        domains: &SchedulingDomain::ALL,
        knowledge: &[],
        create: |_ctx, _spec| {
            Ok(Box::new(ScriptedStep::new(StepBehavior::Sleep {
                duration: Duration::from_secs(60),
            })))
        },
    }
}

/// A filter factory named `gated-filter` that depends on the
/// `test-knowledge` handle.
#[must_use]
pub fn gated_filter_factory() -> FilterFactory {
    FilterFactory {
        plugin: "gated-filter",
        domains: &SchedulingDomain::ALL,
        knowledge: &["test-knowledge"],
        create: |_ctx, _spec| Ok(Box::new(ScriptedStep::new(StepBehavior::Echo { delta: 0.0 }))),
    }
}

/// A filter factory named `broken-filter` whose creation always fails.
#[must_use]
pub fn broken_filter_factory() -> FilterFactory {
    FilterFactory {
        plugin: "broken-filter",
        domains: &SchedulingDomain::ALL,
        knowledge: &[],
        create: |_ctx, spec| {
            Err(cortex_config::error::Error::InvalidStepParams {
                step: spec.effective_name().to_owned(),
                details: "always broken".to_owned(),
            })
        },
    }
}

/// A weigher factory named `broken-weigher` whose creation always fails.
#[must_use]
pub fn broken_weigher_factory() -> WeigherFactory {
    WeigherFactory {
        plugin: "broken-weigher",
        domains: &SchedulingDomain::ALL,
        knowledge: &[],
        create: |_ctx, spec| {
            Err(cortex_config::error::Error::InvalidStepParams {
                step: spec.effective_name().to_owned(),
                details: "always broken".to_owned(),
            })
        },
    }
}
