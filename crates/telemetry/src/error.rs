// SPDX-License-Identifier: Apache-2.0

//! Errors for the telemetry crate.

/// Errors that can occur while registering or rendering metrics.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The registry rejected a configuration (bad prefix or labels).
    #[error("Metric registry error: {details}")]
    Registry {
        /// A description of the rejection.
        details: String,
    },

    /// An instrument could not be registered (e.g. duplicate name).
    #[error("Metric registration error: {details}")]
    Registration {
        /// A description of the rejection.
        details: String,
    },

    /// The registry could not be rendered to the text format.
    #[error("Metric encoding error: {details}")]
    Encode {
        /// A description of the failure.
        details: String,
    },
}
