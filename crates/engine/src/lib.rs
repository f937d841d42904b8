// SPDX-License-Identifier: Apache-2.0

//! Decision pipeline runtime.
//!
//! The runtime composes registered filter and weigher plugins into named
//! pipelines, executes them against placement requests, and owns the live
//! registry that gates which pipelines may serve traffic.
//!
//! Plugins register themselves through [`linkme::distributed_slice`]
//! tables; a [`PluginIndex`] built from those tables resolves names at
//! pipeline-build time. Unknown names are configuration errors — there is
//! no dynamic loading.

use crate::step::{SchedulerStep, StepRole};
use cortex_config::SchedulingDomain;
use cortex_config::objects::StepSpec;
use cortex_store::{HandleTable, KnowledgeStore};
pub use linkme::distributed_slice;
use std::collections::HashMap;
use std::sync::Arc;

pub mod builder;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod step;
pub mod testing;
pub mod tracer;

pub use builder::{BuildReport, PipelineBuilder};
pub use error::Error;
pub use pipeline::{BoundStep, BuiltPipeline, RunOutput};
pub use registry::{PipelinePhase, PipelineRegistry, PipelineSnapshot, RunPermit};
pub use request::{CandidateHost, PlacementRequest};
pub use step::{Activations, StepError, StepResult};
pub use tracer::RunTracer;

/// Everything a step factory may capture at build time.
///
/// The context is shared by all steps of a domain; steps reference
/// knowledge handles by name and resolve them through the handle table at
/// run time, so no step holds a pointer into controller state.
#[derive(Clone)]
pub struct StepContext {
    /// The scheduling domain pipelines are built for.
    pub domain: SchedulingDomain,
    /// The knowledge store steps read feature rows from.
    pub knowledge: Arc<dyn KnowledgeStore>,
    /// The central knowledge handle table.
    pub handles: HandleTable,
}

/// A factory for filter steps.
#[derive(Clone, Copy)]
pub struct FilterFactory {
    /// The registered plugin name.
    pub plugin: &'static str,
    /// The scheduling domains this plugin may serve.
    pub domains: &'static [SchedulingDomain],
    /// Knowledge handles every instance of this plugin depends on.
    pub knowledge: &'static [&'static str],
    /// Builds one step instance, validating its parameter bundle.
    pub create: fn(&StepContext, &StepSpec) -> Result<Box<dyn SchedulerStep>, cortex_config::error::Error>,
}

/// A factory for weigher steps.
#[derive(Clone, Copy)]
pub struct WeigherFactory {
    /// The registered plugin name.
    pub plugin: &'static str,
    /// The scheduling domains this plugin may serve.
    pub domains: &'static [SchedulingDomain],
    /// Knowledge handles every instance of this plugin depends on.
    pub knowledge: &'static [&'static str],
    /// Builds one step instance, validating its parameter bundle.
    pub create: fn(&StepContext, &StepSpec) -> Result<Box<dyn SchedulerStep>, cortex_config::error::Error>,
}

/// Registration table for filter plugins.
#[allow(unsafe_code)]
#[distributed_slice]
pub static FILTER_FACTORIES: [FilterFactory];

/// Registration table for weigher plugins.
#[allow(unsafe_code)]
#[distributed_slice]
pub static WEIGHER_FACTORIES: [WeigherFactory];

/// An index over the registered plugin factories.
///
/// Built once at startup from the registration tables; lookups check that
/// the plugin serves the requested domain.
pub struct PluginIndex {
    filters: HashMap<&'static str, FilterFactory>,
    weighers: HashMap<&'static str, WeigherFactory>,
}

impl PluginIndex {
    /// Builds the index from the linkme registration tables.
    #[must_use]
    pub fn from_registered() -> Self {
        Self::with_factories(FILTER_FACTORIES.iter().copied(), WEIGHER_FACTORIES.iter().copied())
    }

    /// Builds an index from explicit factory lists. Used by tests.
    #[must_use]
    pub fn with_factories(
        filters: impl IntoIterator<Item = FilterFactory>,
        weighers: impl IntoIterator<Item = WeigherFactory>,
    ) -> Self {
        PluginIndex {
            filters: filters.into_iter().map(|f| (f.plugin, f)).collect(),
            weighers: weighers.into_iter().map(|f| (f.plugin, f)).collect(),
        }
    }

    /// Resolves a filter plugin for a domain.
    #[must_use]
    pub fn filter(&self, domain: SchedulingDomain, plugin: &str) -> Option<&FilterFactory> {
        self.filters
            .get(plugin)
            .filter(|f| f.domains.contains(&domain))
    }

    /// Resolves a weigher plugin for a domain.
    #[must_use]
    pub fn weigher(&self, domain: SchedulingDomain, plugin: &str) -> Option<&WeigherFactory> {
        self.weighers
            .get(plugin)
            .filter(|f| f.domains.contains(&domain))
    }

    /// The registered plugin names, for diagnostics.
    #[must_use]
    pub fn plugin_names(&self, role: StepRole) -> Vec<&'static str> {
        let mut names: Vec<_> = match role {
            StepRole::Filter => self.filters.keys().copied().collect(),
            StepRole::Weigher => self.weighers.keys().copied().collect(),
        };
        names.sort_unstable();
        names
    }
}
