// SPDX-License-Identifier: Apache-2.0

//! Errors for the HTTP surfaces.

/// Errors that can occur while running the HTTP servers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configured bind address does not parse.
    #[error("Invalid bind address `{bind_address}`: {details}")]
    InvalidBindAddress {
        /// The configured address.
        bind_address: String,
        /// A description of the parse failure.
        details: String,
    },

    /// The listener could not be bound.
    #[error("Cannot bind `{addr}`: {details}")]
    BindFailed {
        /// The resolved socket address.
        addr: String,
        /// A description of the failure.
        details: String,
    },

    /// The server loop failed.
    #[error("HTTP server failed: {details}")]
    ServeFailed {
        /// A description of the failure.
        details: String,
    },
}
