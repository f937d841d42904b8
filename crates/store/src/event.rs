// SPDX-License-Identifier: Apache-2.0

//! Change notifications delivered by the control plane.

use cortex_config::SchedulingDomain;
use std::fmt;

/// The kinds of declarative objects the control plane persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Scheduling pipelines.
    Pipeline,
    /// Knowledge handles.
    Knowledge,
    /// Persisted decisions.
    Decision,
    /// Capacity reservations.
    Reservation,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ObjectKind::Pipeline => "pipeline",
            ObjectKind::Knowledge => "knowledge",
            ObjectKind::Decision => "decision",
            ObjectKind::Reservation => "reservation",
        };
        f.write_str(label)
    }
}

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    /// The object was created or updated (spec or status).
    Applied,
    /// The object was deleted.
    Deleted,
}

/// One change notification.
///
/// Events carry only the identity of the changed object; consumers re-read
/// the current state from the store, so a lagging watcher converges on the
/// latest revision rather than replaying history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// The kind of the changed object.
    pub kind: ObjectKind,
    /// What happened.
    pub op: WatchOp,
    /// The domain of the changed object.
    pub domain: SchedulingDomain,
    /// The name of the changed object.
    pub name: String,
}
