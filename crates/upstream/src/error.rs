// SPDX-License-Identifier: Apache-2.0

//! Errors for the upstream client crate.

/// Errors that can occur while talking to upstream cloud services.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Authentication against the identity gateway failed.
    #[error("Identity authentication failed: {details}")]
    Auth {
        /// A description of the failure.
        details: String,
    },

    /// A credential handle could not be resolved.
    #[error("Cannot read credentials `{secret_ref}`: {details}")]
    SecretRead {
        /// The credential handle.
        secret_ref: String,
        /// A description of the failure.
        details: String,
    },

    /// The token carried no endpoint for a required service.
    #[error("No endpoint for service `{service}`")]
    MissingEndpoint {
        /// The service name looked up in the catalog.
        service: String,
    },

    /// An HTTP round trip failed.
    #[error("Upstream request to `{url}` failed: {details}")]
    Http {
        /// The request URL.
        url: String,
        /// A description of the failure.
        details: String,
    },

    /// An upstream response could not be decoded.
    #[error("Cannot decode response from `{url}`: {details}")]
    Decode {
        /// The request URL.
        url: String,
        /// A description of the failure.
        details: String,
    },

    /// A URL could not be built from the configured endpoint.
    #[error("Invalid endpoint `{endpoint}`: {details}")]
    InvalidEndpoint {
        /// The configured endpoint.
        endpoint: String,
        /// A description of the failure.
        details: String,
    },
}
