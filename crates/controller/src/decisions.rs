// SPDX-License-Identifier: Apache-2.0

//! The decision writer.
//!
//! Decision records arrive from the HTTP surface over a bounded channel
//! and are persisted by a single worker. The channel send never blocks:
//! a full queue drops the record, because decisions are observability for
//! the reservation subsystem, not part of the synchronous response path.
//! Persistence failures are logged and dropped for the same reason.

use chrono::Utc;
use cortex_config::objects::{DecisionObject, DecisionResult, DecisionSpec, DecisionStatus, ObjectMeta};
use cortex_config::{PipelineName, SchedulingDomain};
use cortex_store::ControlPlaneStore;
use cortex_telemetry::DecisionMetrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One decision taken by a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionUpdate {
    /// The domain the request was scheduled in.
    pub domain: SchedulingDomain,
    /// The pipeline that took the decision.
    pub pipeline: PipelineName,
    /// Identifier of the scheduled resource.
    pub resource_id: String,
    /// Digest of the opaque input spec bundle.
    pub input_spec_digest: String,
    /// The ranked outcome.
    pub result: DecisionResult,
}

/// The sending half of the decision queue.
#[derive(Clone)]
pub struct DecisionSender {
    tx: mpsc::Sender<DecisionUpdate>,
    metrics: DecisionMetrics,
}

impl DecisionSender {
    /// Enqueues a decision without blocking; a full queue drops it.
    pub fn enqueue(&self, update: DecisionUpdate) {
        match self.tx.try_send(update) {
            Ok(()) => self.metrics.observe_enqueued(),
            Err(mpsc::error::TrySendError::Full(update)) => {
                self.metrics.observe_dropped();
                debug!(
                    resource_id = %update.resource_id,
                    pipeline = %update.pipeline,
                    "decision queue full, dropping record"
                );
            }
            Err(mpsc::error::TrySendError::Closed(update)) => {
                self.metrics.observe_dropped();
                debug!(
                    resource_id = %update.resource_id,
                    "decision writer gone, dropping record"
                );
            }
        }
    }
}

/// The draining half of the decision queue.
pub struct DecisionWriter {
    rx: mpsc::Receiver<DecisionUpdate>,
    store: Arc<dyn ControlPlaneStore>,
    metrics: DecisionMetrics,
}

/// Creates the decision queue with the given capacity.
#[must_use]
pub fn decision_channel(
    capacity: usize,
    store: Arc<dyn ControlPlaneStore>,
    metrics: DecisionMetrics,
) -> (DecisionSender, DecisionWriter) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        DecisionSender {
            tx,
            metrics: metrics.clone(),
        },
        DecisionWriter { rx, store, metrics },
    )
}

impl DecisionWriter {
    /// Drains the queue until the token is cancelled and the queue is
    /// empty of already-enqueued records.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                update = self.rx.recv() => match update {
                    Some(update) => self.persist(update).await,
                    None => break,
                },
                () = cancel.cancelled() => {
                    // Drain what is already queued, then stop.
                    while let Ok(update) = self.rx.try_recv() {
                        self.persist(update).await;
                    }
                    break;
                }
            }
        }
        info!("decision writer stopped");
    }

    async fn persist(&self, update: DecisionUpdate) {
        let object = DecisionObject {
            metadata: ObjectMeta::new(update.resource_id.clone(), update.domain),
            spec: DecisionSpec {
                resource_id: update.resource_id.clone(),
                pipeline: update.pipeline.clone(),
                input_spec_digest: update.input_spec_digest.clone(),
            },
            status: DecisionStatus {
                result: Some(update.result.clone()),
                timestamp: Some(Utc::now()),
            },
        };
        match self.store.apply_decision(object).await {
            Ok(_) => self.metrics.observe_persisted(),
            Err(e) => {
                self.metrics.observe_failed();
                warn!(
                    resource_id = %update.resource_id,
                    pipeline = %update.pipeline,
                    error = %e,
                    "cannot persist decision, dropping record"
                );
            }
        }
    }
}
