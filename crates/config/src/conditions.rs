// SPDX-License-Identifier: Apache-2.0

//! Status conditions carried by declarative objects.
//!
//! Conditions follow the usual control-plane convention: a typed latch with
//! a `True`/`False`/`Unknown` status, a machine-readable reason, and the
//! time of the last status transition. The engine only ever writes the
//! `Ready` condition; foreign condition types round-trip untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The condition type gating pipeline activation and knowledge consumption.
pub const CONDITION_READY: &str = "Ready";

/// Reason set on pipelines whose knowledge dependencies are not ready.
pub const REASON_UNREADY_DEPENDENCIES: &str = "UnreadyDependencies";

/// Reason set on pipelines whose step configuration failed to build.
pub const REASON_CONFIG_ERROR: &str = "ConfigError";

/// Reason set on pipelines that built successfully.
pub const REASON_READY: &str = "AllDependenciesReady";

/// Status of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// The condition cannot currently be evaluated.
    Unknown,
}

/// A single typed status condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// The condition type, e.g. `Ready`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether the condition currently holds.
    pub status: ConditionStatus,
    /// Machine-readable reason for the current status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable detail for the current status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the status last changed.
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Creates a `Ready` condition with the given status and reason.
    #[must_use]
    pub fn ready(status: ConditionStatus, reason: &str, message: impl Into<String>) -> Self {
        Condition {
            kind: CONDITION_READY.to_owned(),
            status,
            reason: Some(reason.to_owned()),
            message: Some(message.into()),
            last_transition_time: Utc::now(),
        }
    }
}

/// Upserts `condition` into `conditions`, keyed by condition type.
///
/// The transition time of an existing condition is preserved when the status
/// did not change, so repeated reconciles do not churn timestamps.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == condition.kind) {
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time;
        }
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

/// Returns the condition of the given type, if present.
#[must_use]
pub fn get_condition<'a>(conditions: &'a [Condition], kind: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.kind == kind)
}

/// Whether the `Ready` condition is present with status `True`.
#[must_use]
pub fn is_ready(conditions: &[Condition]) -> bool {
    get_condition(conditions, CONDITION_READY)
        .is_some_and(|c| c.status == ConditionStatus::True)
}
