// SPDX-License-Identifier: Apache-2.0

//! Controllers of the scheduling engine.
//!
//! Three long-running tasks, each driven by its own signal source and
//! stopped through a shared cancellation token:
//!
//! - the [`readiness::ReadinessController`] watches declarative pipeline
//!   and knowledge objects and keeps the live pipeline registry in sync
//!   with their readiness,
//! - the [`reservations::ReservationSyncer`] periodically converts
//!   upstream commitments into declarative reservations,
//! - the [`decisions::DecisionWriter`] drains the decision queue into the
//!   control plane off the hot path.
//!
//! Controllers recover from store and upstream errors on their own
//! cadence; only configuration errors at construction time are fatal.

pub mod decisions;
pub mod error;
pub mod readiness;
pub mod reservations;

pub use decisions::{DecisionSender, DecisionUpdate, DecisionWriter, decision_channel};
pub use error::Error;
pub use readiness::ReadinessController;
pub use reservations::ReservationSyncer;
