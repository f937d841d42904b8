// SPDX-License-Identifier: Apache-2.0

//! Errors for the controller crate.

/// Errors that can occur in the controllers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A control-plane or knowledge-store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] cortex_store::Error),

    /// An upstream service call failed.
    #[error("Upstream error: {0}")]
    Upstream(#[from] cortex_upstream::Error),

    /// A commitment carried a uuid too short to derive stable reservation
    /// names from.
    #[error("Commitment uuid `{uuid}` is too short for reservation naming")]
    ShortCommitmentUuid {
        /// The offending uuid.
        uuid: String,
    },
}
