// SPDX-License-Identifier: Apache-2.0

//! Pipeline building.
//!
//! Turns a declarative pipeline object into a [`BuiltPipeline`], or into a
//! report explaining why it cannot activate. Unknown plugins and filter
//! init failures are critical; a weigher that fails to initialize is
//! skipped and the pipeline activates without it. A pipeline whose
//! knowledge handles are not all ready is deferred, never partially
//! activated.

use crate::error::Error;
use crate::pipeline::{BoundStep, BuiltPipeline};
use crate::step::StepRole;
use crate::{PluginIndex, StepContext};
use cortex_config::objects::{PipelineObject, StepSpec};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

/// A weigher skipped because its factory rejected the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedWeigher {
    /// The skipped step's effective name.
    pub step: String,
    /// Why the factory rejected it.
    pub details: String,
}

/// The outcome of one build attempt.
pub struct BuildReport {
    /// The built pipeline; present only when no critical error occurred
    /// and every knowledge handle is ready.
    pub pipeline: Option<BuiltPipeline>,
    /// Every knowledge handle the pipeline references, ready or not. The
    /// readiness controller indexes dependency edges from this set even
    /// when the build is deferred.
    pub knowledge: BTreeSet<String>,
    /// Handles that are absent or not ready; non-empty means deferred.
    pub unready_knowledge: Vec<String>,
    /// Weighers skipped with a non-critical init failure.
    pub skipped_weighers: Vec<SkippedWeigher>,
    /// Critical errors; non-empty means the pipeline must not activate.
    pub critical_errors: Vec<Error>,
}

impl BuildReport {
    /// Whether the pipeline was built and may be swapped into the live
    /// registry.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.pipeline.is_some()
    }

    /// A one-line summary of why the pipeline is not ready, for status
    /// conditions.
    #[must_use]
    pub fn blocking_summary(&self) -> String {
        if !self.critical_errors.is_empty() {
            let details: Vec<String> =
                self.critical_errors.iter().map(ToString::to_string).collect();
            details.join("; ")
        } else if !self.unready_knowledge.is_empty() {
            format!(
                "knowledge not ready: {}",
                self.unready_knowledge.join(", ")
            )
        } else {
            String::new()
        }
    }
}

/// Builds pipelines for one scheduling domain.
pub struct PipelineBuilder {
    index: Arc<PluginIndex>,
    ctx: StepContext,
}

impl PipelineBuilder {
    /// Creates a builder over the given plugin index and step context.
    #[must_use]
    pub fn new(index: Arc<PluginIndex>, ctx: StepContext) -> Self {
        PipelineBuilder { index, ctx }
    }

    /// Attempts to build the given declarative pipeline.
    ///
    /// Building is idempotent: the same object yields an equivalent
    /// pipeline on every call, so repeated activation is safe.
    #[must_use]
    pub fn build(&self, object: &PipelineObject) -> BuildReport {
        let name = object.metadata.name.clone();
        let mut knowledge = BTreeSet::new();
        let mut skipped_weighers = Vec::new();
        let mut critical_errors = Vec::new();

        if let Err(source) = object.validate() {
            critical_errors.push(Error::InvalidSpec { source });
        }

        let mut filters = Vec::with_capacity(object.spec.filters.len());
        for spec in &object.spec.filters {
            match self.index.filter(self.ctx.domain, &spec.plugin) {
                None => critical_errors.push(Error::UnknownPlugin {
                    pipeline: name.clone(),
                    role: StepRole::Filter,
                    plugin: spec.plugin.clone(),
                }),
                Some(factory) => {
                    collect_knowledge(&mut knowledge, factory.knowledge, spec);
                    match (factory.create)(&self.ctx, spec) {
                        Ok(step) => filters.push(BoundStep {
                            name: spec.effective_name().to_owned(),
                            plugin: spec.plugin.clone(),
                            role: StepRole::Filter,
                            step,
                        }),
                        Err(source) => critical_errors.push(Error::StepInit {
                            pipeline: name.clone(),
                            role: StepRole::Filter,
                            step: spec.effective_name().to_owned(),
                            source,
                        }),
                    }
                }
            }
        }

        let mut weighers = Vec::with_capacity(object.spec.weighers.len());
        for spec in &object.spec.weighers {
            match self.index.weigher(self.ctx.domain, &spec.plugin) {
                None => critical_errors.push(Error::UnknownPlugin {
                    pipeline: name.clone(),
                    role: StepRole::Weigher,
                    plugin: spec.plugin.clone(),
                }),
                Some(factory) => {
                    collect_knowledge(&mut knowledge, factory.knowledge, spec);
                    match (factory.create)(&self.ctx, spec) {
                        Ok(step) => weighers.push(BoundStep {
                            name: spec.effective_name().to_owned(),
                            plugin: spec.plugin.clone(),
                            role: StepRole::Weigher,
                            step,
                        }),
                        Err(source) => {
                            warn!(
                                pipeline = %name,
                                step = spec.effective_name(),
                                error = %source,
                                "skipping weigher with failed initialization"
                            );
                            skipped_weighers.push(SkippedWeigher {
                                step: spec.effective_name().to_owned(),
                                details: source.to_string(),
                            });
                        }
                    }
                }
            }
        }

        let unready_knowledge = self
            .ctx
            .handles
            .unready(knowledge.iter().map(String::as_str));

        let pipeline = if critical_errors.is_empty() && unready_knowledge.is_empty() {
            Some(BuiltPipeline {
                name,
                domain: self.ctx.domain,
                create_decisions: object.spec.create_decisions,
                knowledge: knowledge.clone(),
                filters,
                weighers,
            })
        } else {
            None
        };

        BuildReport {
            pipeline,
            knowledge,
            unready_knowledge,
            skipped_weighers,
            critical_errors,
        }
    }
}

fn collect_knowledge(
    knowledge: &mut BTreeSet<String>,
    declared: &'static [&'static str],
    spec: &StepSpec,
) {
    knowledge.extend(declared.iter().map(|&k| k.to_owned()));
    knowledge.extend(spec.knowledge.iter().cloned());
}
