// SPDX-License-Identifier: Apache-2.0

//! Errors for the store crate.

use crate::event::ObjectKind;

/// Errors that can occur while talking to the control plane or the
/// knowledge store.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The requested object does not exist.
    #[error("{kind} `{name}` not found")]
    NotFound {
        /// The kind of the missing object.
        kind: ObjectKind,
        /// The name of the missing object.
        name: String,
    },

    /// A status patch carried a stale revision.
    #[error("Revision conflict on {kind} `{name}`: expected {expected}, found {found}")]
    Conflict {
        /// The kind of the contested object.
        kind: ObjectKind,
        /// The name of the contested object.
        name: String,
        /// The revision the patch was based on.
        expected: u64,
        /// The revision the store currently holds.
        found: u64,
    },

    /// The requested feature table does not exist in the knowledge store.
    #[error("Unknown knowledge table `{table}`")]
    UnknownTable {
        /// The physical table name.
        table: String,
    },

    /// A row could not be decoded into the shape a consumer asked for.
    #[error("Malformed row in table `{table}`: {details}")]
    MalformedRow {
        /// The physical table name.
        table: String,
        /// A description of the decode failure.
        details: String,
    },

    /// A transient backend failure; callers retry on their own cadence.
    #[error("Store backend error: {details}")]
    Backend {
        /// A description of the failure.
        details: String,
    },
}
