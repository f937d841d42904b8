// SPDX-License-Identifier: Apache-2.0

//! The dependency & readiness controller.
//!
//! Watches declarative pipeline and knowledge objects of one scheduling
//! domain. On every change it recomputes the readiness of the affected
//! pipelines: a pipeline whose plugins resolve, whose filters initialize,
//! and whose knowledge handles are all ready is built and swapped into
//! the live registry; anything else is removed (draining in-flight runs)
//! and reflected in the object's `Ready` condition. Status writes are
//! revision-checked so concurrent reconcilers converge.

use cortex_config::SchedulingDomain;
use cortex_config::conditions::{
    Condition, ConditionStatus, REASON_CONFIG_ERROR, REASON_READY, REASON_UNREADY_DEPENDENCIES,
    set_condition,
};
use cortex_config::objects::PipelineObject;
use cortex_engine::builder::PipelineBuilder;
use cortex_engine::registry::PipelineRegistry;
use cortex_store::{
    ControlPlaneStore, HandleTable, KnowledgeHandle, ObjectKind, WatchEvent,
};
use cortex_telemetry::ControllerMetrics;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PATCH_ATTEMPTS: usize = 3;

/// Keeps the live pipeline registry in sync with declarative state.
pub struct ReadinessController {
    domain: SchedulingDomain,
    store: Arc<dyn ControlPlaneStore>,
    builder: PipelineBuilder,
    handles: HandleTable,
    registry: PipelineRegistry,
    metrics: ControllerMetrics,
    /// Knowledge handle names per pipeline, from the last build attempt.
    dependencies: HashMap<String, BTreeSet<String>>,
}

impl ReadinessController {
    /// Creates a controller over the given store, builder, and registry.
    ///
    /// The handle table must be the same instance the builder's step
    /// context carries; the controller is its single writer.
    #[must_use]
    pub fn new(
        domain: SchedulingDomain,
        store: Arc<dyn ControlPlaneStore>,
        builder: PipelineBuilder,
        handles: HandleTable,
        registry: PipelineRegistry,
        metrics: ControllerMetrics,
    ) -> Self {
        ReadinessController {
            domain,
            store,
            builder,
            handles,
            registry,
            metrics,
            dependencies: HashMap::new(),
        }
    }

    /// Runs until the token is cancelled or the store closes its watch.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut events = self.store.watch();
        self.resync().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "watch lagged, resyncing from lists");
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!(domain = %self.domain, "readiness controller stopped");
    }

    /// Full resync: refresh every knowledge handle, then reconcile every
    /// pipeline of the domain. Errors are logged and retried on the next
    /// event.
    async fn resync(&mut self) {
        match self.store.list_knowledge(self.domain).await {
            Ok(objects) => {
                for object in objects {
                    self.handles.upsert(
                        object.metadata.name.clone(),
                        KnowledgeHandle {
                            table: object.spec.table.clone(),
                            schema_version: object.spec.schema_version,
                            ready: object.is_ready(),
                        },
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot list knowledge, deferring resync");
                self.metrics.observe_reconciliation("knowledge", "error");
                return;
            }
        }
        match self.store.list_pipelines(self.domain).await {
            Ok(objects) => {
                for object in objects {
                    let name = object.metadata.name.clone();
                    self.reconcile_pipeline(&name).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot list pipelines, deferring resync");
                self.metrics.observe_reconciliation("pipeline", "error");
            }
        }
    }

    async fn handle_event(&mut self, event: WatchEvent) {
        if event.domain != self.domain {
            return;
        }
        match event.kind {
            ObjectKind::Knowledge => {
                self.refresh_knowledge(&event.name).await;
                let affected: Vec<String> = self
                    .dependencies
                    .iter()
                    .filter(|(_, knowledge)| knowledge.contains(&event.name))
                    .map(|(pipeline, _)| pipeline.clone())
                    .collect();
                debug!(
                    knowledge = %event.name,
                    affected = affected.len(),
                    "knowledge changed"
                );
                for pipeline in affected {
                    self.reconcile_pipeline(&pipeline).await;
                }
            }
            ObjectKind::Pipeline => self.reconcile_pipeline(&event.name).await,
            ObjectKind::Decision | ObjectKind::Reservation => {}
        }
    }

    async fn refresh_knowledge(&mut self, name: &str) {
        match self.store.get_knowledge(self.domain, name).await {
            Ok(Some(object)) => {
                self.handles.upsert(
                    name,
                    KnowledgeHandle {
                        table: object.spec.table.clone(),
                        schema_version: object.spec.schema_version,
                        ready: object.is_ready(),
                    },
                );
                self.metrics.observe_reconciliation("knowledge", "applied");
            }
            Ok(None) => {
                self.handles.remove(name);
                self.metrics.observe_reconciliation("knowledge", "deleted");
            }
            Err(e) => {
                warn!(knowledge = name, error = %e, "cannot refresh knowledge handle");
                self.metrics.observe_reconciliation("knowledge", "error");
            }
        }
    }

    async fn reconcile_pipeline(&mut self, name: &str) {
        let object = match self.store.get_pipeline(self.domain, name).await {
            Ok(object) => object,
            Err(e) => {
                warn!(pipeline = name, error = %e, "cannot read pipeline, will retry");
                self.metrics.observe_reconciliation("pipeline", "error");
                return;
            }
        };

        let Some(object) = object else {
            let existed = self.registry.remove_and_drain(self.domain, name).await;
            let _ = self.dependencies.remove(name);
            self.metrics.forget_pipeline(name);
            self.metrics.observe_reconciliation("pipeline", "deleted");
            if existed {
                info!(pipeline = name, "pipeline torn down");
            }
            return;
        };

        let report = self.builder.build(&object);
        let _ = self
            .dependencies
            .insert(name.to_owned(), report.knowledge.iter().cloned().collect());

        if let Some(pipeline) = report.pipeline {
            let message = if report.skipped_weighers.is_empty() {
                format!("{} steps active", pipeline.step_names().len())
            } else {
                let skipped: Vec<&str> = report
                    .skipped_weighers
                    .iter()
                    .map(|s| s.step.as_str())
                    .collect();
                format!(
                    "{} steps active, weighers skipped: {}",
                    pipeline.step_names().len(),
                    skipped.join(", ")
                )
            };
            self.registry.insert(pipeline);
            self.metrics.set_pipeline_ready(name, true);
            self.metrics.observe_reconciliation("pipeline", "ready");
            info!(pipeline = name, domain = %self.domain, "pipeline ready");
            self.patch_status(
                object,
                Condition::ready(ConditionStatus::True, REASON_READY, message),
            )
            .await;
        } else {
            let was_live = self.registry.remove_and_drain(self.domain, name).await;
            self.metrics.set_pipeline_ready(name, false);
            self.metrics.observe_reconciliation("pipeline", "unready");
            let reason = if report.critical_errors.is_empty() {
                REASON_UNREADY_DEPENDENCIES
            } else {
                REASON_CONFIG_ERROR
            };
            let message = report.blocking_summary();
            if was_live {
                info!(pipeline = name, reason, "pipeline removed from service");
            } else {
                debug!(pipeline = name, reason, "pipeline not ready");
            }
            self.patch_status(
                object,
                Condition::ready(ConditionStatus::False, reason, message),
            )
            .await;
        }
    }

    /// Patches the `Ready` condition, retrying on revision conflicts.
    ///
    /// A patch that would not change the status is skipped, so reconcile
    /// passes triggered by our own status writes settle instead of
    /// ping-ponging.
    async fn patch_status(&self, mut object: PipelineObject, condition: Condition) {
        for _ in 0..PATCH_ATTEMPTS {
            let mut status = object.status.clone();
            set_condition(&mut status.conditions, condition.clone());
            if status == object.status {
                return;
            }
            match self
                .store
                .patch_pipeline_status(
                    self.domain,
                    &object.metadata.name,
                    object.metadata.resource_version,
                    status,
                )
                .await
            {
                Ok(_) => return,
                Err(cortex_store::Error::Conflict { .. }) => {
                    match self.store.get_pipeline(self.domain, &object.metadata.name).await {
                        Ok(Some(current)) => object = current,
                        Ok(None) => return,
                        Err(e) => {
                            warn!(pipeline = %object.metadata.name, error = %e, "cannot re-read pipeline for status patch");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(pipeline = %object.metadata.name, error = %e, "cannot patch pipeline status");
                    return;
                }
            }
        }
        warn!(
            pipeline = %object.metadata.name,
            "giving up on status patch after repeated conflicts"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_config::conditions::{CONDITION_READY, get_condition};
    use cortex_config::objects::{
        KnowledgeObject, KnowledgeSpec, KnowledgeStatus, ObjectMeta, PipelineSpec, PipelineStatus,
        StepSpec,
    };
    use cortex_engine::testing as engine_testing;
    use cortex_engine::{PluginIndex, StepContext};
    use cortex_store::MemoryStore;
    use cortex_telemetry::MetricsHandle;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const DOMAIN: SchedulingDomain = SchedulingDomain::Compute;

    struct Harness {
        store: Arc<MemoryStore>,
        registry: PipelineRegistry,
        handles: HandleTable,
        cancel: CancellationToken,
    }

    impl Harness {
        fn start() -> Self {
            let store = Arc::new(MemoryStore::new());
            let registry = PipelineRegistry::new();
            let handles = HandleTable::new();
            let ctx = StepContext {
                domain: DOMAIN,
                knowledge: Arc::new(cortex_store::MemoryKnowledgeStore::new()),
                handles: handles.clone(),
            };
            let index = PluginIndex::with_factories(
                [
                    engine_testing::echo_filter_factory(),
                    engine_testing::gated_filter_factory(),
                    engine_testing::broken_filter_factory(),
                ],
                [engine_testing::echo_weigher_factory()],
            );
            let metrics =
                ControllerMetrics::new(&MetricsHandle::new(&BTreeMap::new()).unwrap()).unwrap();
            let controller = ReadinessController::new(
                DOMAIN,
                store.clone() as Arc<dyn ControlPlaneStore>,
                PipelineBuilder::new(Arc::new(index), ctx),
                handles.clone(),
                registry.clone(),
                metrics,
            );
            let cancel = CancellationToken::new();
            let _task = tokio::spawn(controller.run(cancel.clone()));
            Harness {
                store,
                registry,
                handles,
                cancel,
            }
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    async fn eventually(what: &str, mut check: impl AsyncFnMut() -> bool) {
        for _ in 0..400 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached: {what}");
    }

    fn pipeline_object(name: &str, filters: Vec<StepSpec>) -> PipelineObject {
        PipelineObject {
            metadata: ObjectMeta::new(name, DOMAIN),
            spec: PipelineSpec {
                pipeline_type: "external".to_owned(),
                filters,
                weighers: vec![StepSpec {
                    plugin: "echo-weigher".to_owned(),
                    name: None,
                    params: serde_json::Value::Null,
                    knowledge: Vec::new(),
                }],
                create_decisions: false,
            },
            status: PipelineStatus::default(),
        }
    }

    fn step(plugin: &str) -> StepSpec {
        StepSpec {
            plugin: plugin.to_owned(),
            name: None,
            params: serde_json::Value::Null,
            knowledge: Vec::new(),
        }
    }

    fn knowledge_object(name: &str, ready: bool) -> KnowledgeObject {
        let mut status = KnowledgeStatus::default();
        status.conditions.push(Condition::ready(
            if ready {
                ConditionStatus::True
            } else {
                ConditionStatus::False
            },
            if ready { "Published" } else { "Stale" },
            "",
        ));
        KnowledgeObject {
            metadata: ObjectMeta::new(name, DOMAIN),
            spec: KnowledgeSpec {
                table: format!("feature_{}", name.replace('-', "_")),
                schema_version: 1,
            },
            status,
        }
    }

    async fn ready_reason(store: &MemoryStore, name: &str) -> (ConditionStatus, String) {
        let object = store.get_pipeline(DOMAIN, name).await.unwrap().unwrap();
        let condition = get_condition(&object.status.conditions, CONDITION_READY)
            .cloned()
            .unwrap();
        (condition.status, condition.reason.unwrap_or_default())
    }

    async fn has_ready_condition(store: &MemoryStore, name: &str) -> bool {
        matches!(
            store.get_pipeline(DOMAIN, name).await,
            Ok(Some(object)) if get_condition(&object.status.conditions, CONDITION_READY).is_some()
        )
    }

    #[tokio::test]
    async fn pipeline_without_dependencies_becomes_ready() {
        let harness = Harness::start();
        let _ = harness
            .store
            .apply_pipeline(pipeline_object("default", vec![step("echo-filter")]))
            .await
            .unwrap();

        eventually("pipeline ready", async || {
            harness.registry.is_ready(DOMAIN, "default")
        })
        .await;
        let (status, reason) = ready_reason(&harness.store, "default").await;
        assert_eq!(status, ConditionStatus::True);
        assert_eq!(reason, REASON_READY);
    }

    #[tokio::test]
    async fn unknown_plugin_is_a_config_error() {
        let harness = Harness::start();
        let _ = harness
            .store
            .apply_pipeline(pipeline_object("default", vec![step("missing")]))
            .await
            .unwrap();

        eventually("status written", async || {
            has_ready_condition(&harness.store, "default").await
        })
        .await;
        let (status, reason) = ready_reason(&harness.store, "default").await;
        assert_eq!(status, ConditionStatus::False);
        assert_eq!(reason, REASON_CONFIG_ERROR);
        assert!(!harness.registry.is_ready(DOMAIN, "default"));
    }

    #[tokio::test]
    async fn knowledge_latch_gates_activation_and_teardown() {
        let harness = Harness::start();
        let _ = harness
            .store
            .apply_pipeline(pipeline_object("gated", vec![step("gated-filter")]))
            .await
            .unwrap();

        // Not ready while the handle is absent.
        eventually("pending status", async || {
            has_ready_condition(&harness.store, "gated").await
        })
        .await;
        let (status, reason) = ready_reason(&harness.store, "gated").await;
        assert_eq!(status, ConditionStatus::False);
        assert_eq!(reason, REASON_UNREADY_DEPENDENCIES);

        // Publishing the handle activates the pipeline.
        let _ = harness
            .store
            .apply_knowledge(knowledge_object("test-knowledge", true))
            .await
            .unwrap();
        eventually("pipeline ready", async || {
            harness.registry.is_ready(DOMAIN, "gated")
        })
        .await;

        // Flipping the handle to not-ready tears it down again.
        let _ = harness
            .store
            .apply_knowledge(knowledge_object("test-knowledge", false))
            .await
            .unwrap();
        eventually("pipeline drained", async || {
            !harness.registry.is_ready(DOMAIN, "gated")
        })
        .await;
        let (status, reason) = ready_reason(&harness.store, "gated").await;
        assert_eq!(status, ConditionStatus::False);
        assert_eq!(reason, REASON_UNREADY_DEPENDENCIES);
    }

    #[tokio::test]
    async fn deleted_pipeline_leaves_the_registry() {
        let harness = Harness::start();
        let _ = harness
            .store
            .apply_pipeline(pipeline_object("default", vec![step("echo-filter")]))
            .await
            .unwrap();
        eventually("pipeline ready", async || {
            harness.registry.is_ready(DOMAIN, "default")
        })
        .await;

        harness
            .store
            .delete_pipeline(DOMAIN, "default")
            .await
            .unwrap();
        eventually("pipeline gone", async || {
            !harness.registry.is_ready(DOMAIN, "default")
        })
        .await;
    }

    #[tokio::test]
    async fn foreign_domain_objects_are_ignored() {
        let harness = Harness::start();
        let mut object = pipeline_object("foreign", vec![step("echo-filter")]);
        object.metadata.domain = SchedulingDomain::BlockStorage;
        let _ = harness.store.apply_pipeline(object).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            !harness
                .registry
                .is_ready(SchedulingDomain::BlockStorage, "foreign")
        );
        let stored = harness
            .store
            .get_pipeline(SchedulingDomain::BlockStorage, "foreign")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.status.conditions.is_empty());
    }

    #[tokio::test]
    async fn handle_table_tracks_knowledge_objects() {
        let harness = Harness::start();
        let _ = harness
            .store
            .apply_knowledge(knowledge_object("host-utilization", true))
            .await
            .unwrap();
        eventually("handle present", async || {
            harness
                .handles
                .resolve("host-utilization")
                .is_some_and(|k| k.ready)
        })
        .await;

        harness
            .store
            .delete_knowledge(DOMAIN, "host-utilization")
            .await
            .unwrap();
        eventually("handle removed", async || {
            harness.handles.resolve("host-utilization").is_none()
        })
        .await;
    }
}
