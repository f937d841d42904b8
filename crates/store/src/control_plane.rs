// SPDX-License-Identifier: Apache-2.0

//! The control-plane store interface.
//!
//! The store persists declarative objects and delivers change
//! notifications. Status mutations are revision-checked merge-patches:
//! a patch based on a stale revision is rejected with
//! [`Error::Conflict`](crate::Error::Conflict) and the caller re-reads and
//! retries, so concurrent reconcilers converge.

use crate::error::Error;
use crate::event::WatchEvent;
use async_trait::async_trait;
use cortex_config::SchedulingDomain;
use cortex_config::objects::{
    DecisionObject, KnowledgeObject, PipelineObject, PipelineStatus, ReservationObject,
};
use tokio::sync::broadcast;

/// Persists declarative objects and delivers change notifications.
///
/// All listing calls are scoped to a scheduling domain; an engine process
/// never observes objects of a domain it does not serve.
#[async_trait]
pub trait ControlPlaneStore: Send + Sync {
    /// Returns the pipeline with the given name, or `None`.
    async fn get_pipeline(
        &self,
        domain: SchedulingDomain,
        name: &str,
    ) -> Result<Option<PipelineObject>, Error>;

    /// Lists all pipelines of a domain.
    async fn list_pipelines(&self, domain: SchedulingDomain)
    -> Result<Vec<PipelineObject>, Error>;

    /// Creates or updates a pipeline; the stored revision is bumped.
    async fn apply_pipeline(&self, object: PipelineObject) -> Result<PipelineObject, Error>;

    /// Merge-patches the status of a pipeline at the given revision.
    async fn patch_pipeline_status(
        &self,
        domain: SchedulingDomain,
        name: &str,
        revision: u64,
        status: PipelineStatus,
    ) -> Result<PipelineObject, Error>;

    /// Deletes a pipeline. Deleting an absent pipeline is not an error.
    async fn delete_pipeline(&self, domain: SchedulingDomain, name: &str) -> Result<(), Error>;

    /// Returns the knowledge handle with the given name, or `None`.
    async fn get_knowledge(
        &self,
        domain: SchedulingDomain,
        name: &str,
    ) -> Result<Option<KnowledgeObject>, Error>;

    /// Lists all knowledge handles of a domain.
    async fn list_knowledge(&self, domain: SchedulingDomain)
    -> Result<Vec<KnowledgeObject>, Error>;

    /// Creates or updates a knowledge handle; the stored revision is bumped.
    async fn apply_knowledge(&self, object: KnowledgeObject) -> Result<KnowledgeObject, Error>;

    /// Deletes a knowledge handle. Deleting an absent handle is not an
    /// error.
    async fn delete_knowledge(&self, domain: SchedulingDomain, name: &str) -> Result<(), Error>;

    /// Creates or updates a decision record.
    async fn apply_decision(&self, object: DecisionObject) -> Result<DecisionObject, Error>;

    /// Lists all decision records of a domain.
    async fn list_decisions(&self, domain: SchedulingDomain) -> Result<Vec<DecisionObject>, Error>;

    /// Lists all reservations of a domain.
    async fn list_reservations(
        &self,
        domain: SchedulingDomain,
    ) -> Result<Vec<ReservationObject>, Error>;

    /// Creates or updates a reservation; the stored revision is bumped.
    async fn apply_reservation(
        &self,
        object: ReservationObject,
    ) -> Result<ReservationObject, Error>;

    /// Deletes a reservation. Deleting an absent reservation is not an
    /// error.
    async fn delete_reservation(&self, domain: SchedulingDomain, name: &str) -> Result<(), Error>;

    /// Subscribes to change notifications for all kinds.
    ///
    /// The receiver may lag and drop events under load; consumers treat a
    /// lag as a hint to resync from a full list.
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}
