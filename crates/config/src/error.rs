// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

use miette::Diagnostic;

/// Errors that can occur while loading settings or validating declarative
/// objects.
///
/// Note: settings errors are fatal at process startup; object errors are
/// surfaced as `Ready=False` conditions by the controllers.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// A collection of errors that occurred during parsing or validation.
    #[error("Invalid configuration: {errors:?}")]
    #[diagnostic(code(cortex::config::invalid_configuration))]
    InvalidConfiguration {
        /// A list of errors that occurred during parsing or validation.
        #[related]
        errors: Vec<Error>,
    },

    /// An error that occurred while reading a configuration file.
    #[error("File read error for `{path}`: {details}")]
    #[diagnostic(code(cortex::config::file_read_error))]
    FileReadError {
        /// The path of the file that could not be read.
        path: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// An error that occurred while deserializing a configuration document.
    #[error("{format} deserialization error in `{path}`: {details}")]
    #[diagnostic(code(cortex::config::deserialization_error))]
    DeserializationError {
        /// The path of the document that failed to deserialize.
        path: String,
        /// The format of the document (e.g. "JSON").
        format: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// A scheduling domain name that this engine does not know.
    #[error("Unknown scheduling domain `{value}`")]
    #[diagnostic(code(cortex::config::unknown_domain))]
    UnknownDomain {
        /// The raw domain value.
        value: String,
    },

    /// A pipeline declared two steps with the same effective name.
    #[error("Duplicate step `{step}` in pipeline `{pipeline}`")]
    #[diagnostic(code(cortex::config::duplicate_step))]
    DuplicateStep {
        /// The pipeline that contains the duplicate.
        pipeline: String,
        /// The step name that was used twice.
        step: String,
    },

    /// A pipeline or step carried an empty name.
    #[error("Empty {field} in pipeline `{pipeline}`")]
    #[diagnostic(code(cortex::config::empty_field))]
    EmptyField {
        /// The pipeline the empty field belongs to.
        pipeline: String,
        /// The field that was empty (e.g. "plugin name").
        field: String,
    },

    /// A step parameter bundle was rejected by its plugin.
    #[error("Invalid parameters for step `{step}`: {details}")]
    #[diagnostic(code(cortex::config::invalid_step_params))]
    InvalidStepParams {
        /// The step whose parameters were rejected.
        step: String,
        /// A description of the rejection.
        details: String,
    },

    /// A settings field failed semantic validation after deserialization.
    #[error("Invalid setting `{setting}`: {details}")]
    #[diagnostic(code(cortex::config::invalid_setting))]
    InvalidSetting {
        /// The dotted path of the offending setting.
        setting: String,
        /// A description of why the value was rejected.
        details: String,
    },
}
