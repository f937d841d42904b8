// SPDX-License-Identifier: Apache-2.0

//! The live pipeline registry.
//!
//! The registry exclusively owns built pipelines. Readers (HTTP handlers)
//! take the shared lock only long enough to copy a handle out; writers
//! (the readiness controller) swap or remove under the exclusive lock.
//! Removal drains: the pipeline stops accepting new runs immediately and
//! the remover waits until every in-flight run finished. A request naming
//! a pipeline that is absent or draining fails with `PipelineUnavailable`.

use crate::error::Error;
use crate::pipeline::BuiltPipeline;
use cortex_config::{PipelineName, SchedulingDomain};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Lifecycle phase of a pipeline in the registry.
///
/// `Absent` and `Pending` pipelines are not in the registry at all: a
/// pipeline is either fully built or absent from the live map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelinePhase {
    /// Serving runs.
    Ready,
    /// Removed from service, waiting for in-flight runs to finish.
    Draining,
}

/// A point-in-time view of one registered pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSnapshot {
    /// The pipeline name.
    pub name: PipelineName,
    /// The scheduling domain the pipeline serves.
    pub domain: SchedulingDomain,
    /// The lifecycle phase at snapshot time.
    pub phase: PipelinePhase,
    /// Whether runs enqueue decision records.
    pub create_decisions: bool,
    /// The knowledge handles the pipeline depends on.
    pub knowledge: BTreeSet<String>,
    /// Runs currently in flight.
    pub in_flight: usize,
}

struct Entry {
    pipeline: BuiltPipeline,
    in_flight: AtomicUsize,
    draining: AtomicBool,
    drained: Notify,
}

/// A permit to run one registered pipeline.
///
/// Holding a permit keeps the pipeline alive through a concurrent swap or
/// removal; dropping it releases the drain barrier.
pub struct RunPermit {
    entry: Arc<Entry>,
}

impl RunPermit {
    /// The pipeline this permit grants a run on.
    #[must_use]
    pub fn pipeline(&self) -> &BuiltPipeline {
        &self.entry.pipeline
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        if self.entry.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.entry.drained.notify_waiters();
        }
    }
}

/// The shared registry of live pipelines, keyed by domain and name.
#[derive(Clone, Default)]
pub struct PipelineRegistry {
    inner: Arc<RwLock<HashMap<(SchedulingDomain, PipelineName), Arc<Entry>>>>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically swaps a built pipeline into the registry.
    ///
    /// A previous pipeline under the same key is unlinked immediately; its
    /// in-flight runs finish on the old instance. Inserting the same
    /// pipeline again is idempotent from the caller's perspective.
    pub fn insert(&self, pipeline: BuiltPipeline) {
        let key = (pipeline.domain, pipeline.name.clone());
        let entry = Arc::new(Entry {
            pipeline,
            in_flight: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            drained: Notify::new(),
        });
        if let Some(previous) = self.inner.write().insert(key, entry) {
            previous.draining.store(true, Ordering::Release);
        }
    }

    /// Starts a run on the named pipeline.
    pub fn begin_run(
        &self,
        domain: SchedulingDomain,
        name: &str,
    ) -> Result<RunPermit, Error> {
        let unavailable = || Error::PipelineUnavailable {
            domain,
            pipeline: name.to_owned(),
        };
        let entry = self
            .inner
            .read()
            .get(&(domain, name.to_owned()))
            .cloned()
            .ok_or_else(unavailable)?;
        if entry.draining.load(Ordering::Acquire) {
            return Err(unavailable());
        }
        let _ = entry.in_flight.fetch_add(1, Ordering::AcqRel);
        // A remover may have flipped the flag between the check and the
        // increment; back out so the drain barrier stays correct.
        if entry.draining.load(Ordering::Acquire) {
            if entry.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                entry.drained.notify_waiters();
            }
            return Err(unavailable());
        }
        Ok(RunPermit { entry })
    }

    /// Removes the named pipeline and waits for its in-flight runs.
    ///
    /// Returns `false` when the pipeline was not registered.
    pub async fn remove_and_drain(&self, domain: SchedulingDomain, name: &str) -> bool {
        let entry = self.inner.write().remove(&(domain, name.to_owned()));
        let Some(entry) = entry else {
            return false;
        };
        entry.draining.store(true, Ordering::Release);
        loop {
            let notified = entry.drained.notified();
            if entry.in_flight.load(Ordering::Acquire) == 0 {
                return true;
            }
            notified.await;
        }
    }

    /// Whether the named pipeline is registered and not draining.
    #[must_use]
    pub fn is_ready(&self, domain: SchedulingDomain, name: &str) -> bool {
        self.inner
            .read()
            .get(&(domain, name.to_owned()))
            .is_some_and(|entry| !entry.draining.load(Ordering::Acquire))
    }

    /// A point-in-time view of every registered pipeline, sorted by
    /// domain and name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PipelineSnapshot> {
        let mut snapshots: Vec<PipelineSnapshot> = self
            .inner
            .read()
            .values()
            .map(|entry| PipelineSnapshot {
                name: entry.pipeline.name.clone(),
                domain: entry.pipeline.domain,
                phase: if entry.draining.load(Ordering::Acquire) {
                    PipelinePhase::Draining
                } else {
                    PipelinePhase::Ready
                },
                create_decisions: entry.pipeline.create_decisions,
                knowledge: entry.pipeline.knowledge.clone(),
                in_flight: entry.in_flight.load(Ordering::Acquire),
            })
            .collect();
        snapshots.sort_by(|a, b| (a.domain, &a.name).cmp(&(b.domain, &b.name)));
        snapshots
    }
}
