// SPDX-License-Identifier: Apache-2.0

//! Errors for the pipeline runtime.

use crate::step::{StepError, StepRole};
use cortex_config::{HostId, PipelineName, SchedulingDomain};

/// All errors that can occur while building or running a pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The placement request violated a structural invariant.
    #[error("Invalid placement request: {details}")]
    InvalidRequest {
        /// A user-safe description of the violation.
        details: String,
    },

    /// A pipeline referenced a plugin that is not registered.
    #[error("Unknown {role} plugin `{plugin}` in pipeline `{pipeline}`")]
    UnknownPlugin {
        /// The pipeline that referenced the plugin.
        pipeline: PipelineName,
        /// Whether the reference was a filter or a weigher.
        role: StepRole,
        /// The unresolved plugin name.
        plugin: String,
    },

    /// A step factory rejected its configuration.
    #[error("Failed to initialize {role} step `{step}` in pipeline `{pipeline}`: {source}")]
    StepInit {
        /// The pipeline the step belongs to.
        pipeline: PipelineName,
        /// Whether the step is a filter or a weigher.
        role: StepRole,
        /// The step's effective name.
        step: String,
        /// The rejection reported by the factory.
        #[source]
        source: cortex_config::error::Error,
    },

    /// The pipeline spec itself was invalid.
    #[error("Invalid pipeline spec: {source}")]
    InvalidSpec {
        /// The validation failure.
        #[source]
        source: cortex_config::error::Error,
    },

    /// A step failed during a run. The run is aborted and partial results
    /// are discarded.
    #[error("Step `{step}` failed in pipeline `{pipeline}`: {source}")]
    StepFailed {
        /// The pipeline being run.
        pipeline: PipelineName,
        /// The step that failed.
        step: String,
        /// The failure reported by the step.
        #[source]
        source: StepError,
    },

    /// A weigher omitted hosts from its activations. Weighers must not
    /// shrink the candidate set.
    #[error("Weigher `{step}` removed hosts in pipeline `{pipeline}`: {hosts:?}")]
    WeigherRemovedHosts {
        /// The pipeline being run.
        pipeline: PipelineName,
        /// The offending weigher.
        step: String,
        /// The hosts missing from the weigher's activations.
        hosts: Vec<HostId>,
    },

    /// A step produced a non-finite score delta.
    #[error(
        "Step `{step}` produced a non-finite delta {value} for host `{host}` in pipeline `{pipeline}`"
    )]
    NonFiniteDelta {
        /// The pipeline being run.
        pipeline: PipelineName,
        /// The offending step.
        step: String,
        /// The host the delta was emitted for.
        host: HostId,
        /// The non-finite value.
        value: f64,
    },

    /// A step exceeded the run deadline.
    #[error("Step `{step}` exceeded the run deadline in pipeline `{pipeline}`")]
    StepTimeout {
        /// The pipeline being run.
        pipeline: PipelineName,
        /// The step that timed out.
        step: String,
    },

    /// The run was cancelled by its initiator.
    #[error("Pipeline run cancelled")]
    Cancelled,

    /// The named pipeline is absent from the live registry or draining.
    #[error("Pipeline `{pipeline}` is not available in domain `{domain}`")]
    PipelineUnavailable {
        /// The domain the request named.
        domain: SchedulingDomain,
        /// The pipeline the request named.
        pipeline: PipelineName,
    },
}
