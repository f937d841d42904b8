// SPDX-License-Identifier: Apache-2.0

//! In-memory control-plane store.
//!
//! Backs tests and single-process deployments. Objects are held per kind
//! and domain; every write bumps the object's revision and broadcasts a
//! watch event. Watchers that lag simply miss events and resync.

use crate::control_plane::ControlPlaneStore;
use crate::error::Error;
use crate::event::{ObjectKind, WatchEvent, WatchOp};
use async_trait::async_trait;
use cortex_config::SchedulingDomain;
use cortex_config::objects::{
    DecisionObject, KnowledgeObject, PipelineObject, PipelineStatus, ReservationObject,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;

type Key = (SchedulingDomain, String);

const WATCH_CAPACITY: usize = 256;

/// An in-memory [`ControlPlaneStore`].
pub struct MemoryStore {
    pipelines: RwLock<HashMap<Key, PipelineObject>>,
    knowledge: RwLock<HashMap<Key, KnowledgeObject>>,
    decisions: RwLock<HashMap<Key, DecisionObject>>,
    reservations: RwLock<HashMap<Key, ReservationObject>>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        MemoryStore {
            pipelines: RwLock::new(HashMap::new()),
            knowledge: RwLock::new(HashMap::new()),
            decisions: RwLock::new(HashMap::new()),
            reservations: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn notify(&self, kind: ObjectKind, op: WatchOp, domain: SchedulingDomain, name: &str) {
        // Send fails only when no watcher is subscribed, which is fine.
        let _ = self.events.send(WatchEvent {
            kind,
            op,
            domain,
            name: name.to_owned(),
        });
    }
}

#[async_trait]
impl ControlPlaneStore for MemoryStore {
    async fn get_pipeline(
        &self,
        domain: SchedulingDomain,
        name: &str,
    ) -> Result<Option<PipelineObject>, Error> {
        Ok(self.pipelines.read().get(&(domain, name.to_owned())).cloned())
    }

    async fn list_pipelines(
        &self,
        domain: SchedulingDomain,
    ) -> Result<Vec<PipelineObject>, Error> {
        let mut objects: Vec<_> = self
            .pipelines
            .read()
            .values()
            .filter(|o| o.metadata.domain == domain)
            .cloned()
            .collect();
        objects.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(objects)
    }

    async fn apply_pipeline(&self, mut object: PipelineObject) -> Result<PipelineObject, Error> {
        let key = (object.metadata.domain, object.metadata.name.clone());
        {
            let mut pipelines = self.pipelines.write();
            let current = pipelines.get(&key).map(|o| o.metadata.resource_version);
            object.metadata.resource_version = current.unwrap_or(0) + 1;
            let _ = pipelines.insert(key.clone(), object.clone());
        }
        self.notify(ObjectKind::Pipeline, WatchOp::Applied, key.0, &key.1);
        Ok(object)
    }

    async fn patch_pipeline_status(
        &self,
        domain: SchedulingDomain,
        name: &str,
        revision: u64,
        status: PipelineStatus,
    ) -> Result<PipelineObject, Error> {
        let patched = {
            let mut pipelines = self.pipelines.write();
            let object = pipelines.get_mut(&(domain, name.to_owned())).ok_or_else(|| {
                Error::NotFound {
                    kind: ObjectKind::Pipeline,
                    name: name.to_owned(),
                }
            })?;
            if object.metadata.resource_version != revision {
                return Err(Error::Conflict {
                    kind: ObjectKind::Pipeline,
                    name: name.to_owned(),
                    expected: revision,
                    found: object.metadata.resource_version,
                });
            }
            object.status = status;
            object.metadata.resource_version += 1;
            object.clone()
        };
        self.notify(ObjectKind::Pipeline, WatchOp::Applied, domain, name);
        Ok(patched)
    }

    async fn delete_pipeline(&self, domain: SchedulingDomain, name: &str) -> Result<(), Error> {
        let removed = self
            .pipelines
            .write()
            .remove(&(domain, name.to_owned()))
            .is_some();
        if removed {
            self.notify(ObjectKind::Pipeline, WatchOp::Deleted, domain, name);
        }
        Ok(())
    }

    async fn get_knowledge(
        &self,
        domain: SchedulingDomain,
        name: &str,
    ) -> Result<Option<KnowledgeObject>, Error> {
        Ok(self.knowledge.read().get(&(domain, name.to_owned())).cloned())
    }

    async fn list_knowledge(
        &self,
        domain: SchedulingDomain,
    ) -> Result<Vec<KnowledgeObject>, Error> {
        let mut objects: Vec<_> = self
            .knowledge
            .read()
            .values()
            .filter(|o| o.metadata.domain == domain)
            .cloned()
            .collect();
        objects.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(objects)
    }

    async fn apply_knowledge(&self, mut object: KnowledgeObject) -> Result<KnowledgeObject, Error> {
        let key = (object.metadata.domain, object.metadata.name.clone());
        {
            let mut knowledge = self.knowledge.write();
            let current = knowledge.get(&key).map(|o| o.metadata.resource_version);
            object.metadata.resource_version = current.unwrap_or(0) + 1;
            let _ = knowledge.insert(key.clone(), object.clone());
        }
        self.notify(ObjectKind::Knowledge, WatchOp::Applied, key.0, &key.1);
        Ok(object)
    }

    async fn delete_knowledge(&self, domain: SchedulingDomain, name: &str) -> Result<(), Error> {
        let removed = self
            .knowledge
            .write()
            .remove(&(domain, name.to_owned()))
            .is_some();
        if removed {
            self.notify(ObjectKind::Knowledge, WatchOp::Deleted, domain, name);
        }
        Ok(())
    }

    async fn apply_decision(&self, mut object: DecisionObject) -> Result<DecisionObject, Error> {
        let key = (object.metadata.domain, object.metadata.name.clone());
        {
            let mut decisions = self.decisions.write();
            let current = decisions.get(&key).map(|o| o.metadata.resource_version);
            object.metadata.resource_version = current.unwrap_or(0) + 1;
            let _ = decisions.insert(key.clone(), object.clone());
        }
        self.notify(ObjectKind::Decision, WatchOp::Applied, key.0, &key.1);
        Ok(object)
    }

    async fn list_decisions(
        &self,
        domain: SchedulingDomain,
    ) -> Result<Vec<DecisionObject>, Error> {
        let mut objects: Vec<_> = self
            .decisions
            .read()
            .values()
            .filter(|o| o.metadata.domain == domain)
            .cloned()
            .collect();
        objects.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(objects)
    }

    async fn list_reservations(
        &self,
        domain: SchedulingDomain,
    ) -> Result<Vec<ReservationObject>, Error> {
        let mut objects: Vec<_> = self
            .reservations
            .read()
            .values()
            .filter(|o| o.metadata.domain == domain)
            .cloned()
            .collect();
        objects.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(objects)
    }

    async fn apply_reservation(
        &self,
        mut object: ReservationObject,
    ) -> Result<ReservationObject, Error> {
        let key = (object.metadata.domain, object.metadata.name.clone());
        {
            let mut reservations = self.reservations.write();
            let current = reservations.get(&key).map(|o| o.metadata.resource_version);
            object.metadata.resource_version = current.unwrap_or(0) + 1;
            let _ = reservations.insert(key.clone(), object.clone());
        }
        self.notify(ObjectKind::Reservation, WatchOp::Applied, key.0, &key.1);
        Ok(object)
    }

    async fn delete_reservation(&self, domain: SchedulingDomain, name: &str) -> Result<(), Error> {
        let removed = self
            .reservations
            .write()
            .remove(&(domain, name.to_owned()))
            .is_some();
        if removed {
            self.notify(ObjectKind::Reservation, WatchOp::Deleted, domain, name);
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_config::objects::{ObjectMeta, PipelineSpec};

    fn pipeline(name: &str) -> PipelineObject {
        PipelineObject {
            metadata: ObjectMeta::new(name, SchedulingDomain::Compute),
            spec: PipelineSpec {
                pipeline_type: "external".to_owned(),
                filters: Vec::new(),
                weighers: Vec::new(),
                create_decisions: false,
            },
            status: PipelineStatus::default(),
        }
    }

    #[tokio::test]
    async fn apply_bumps_revision_and_notifies() {
        let store = MemoryStore::new();
        let mut events = store.watch();

        let applied = store.apply_pipeline(pipeline("default")).await.unwrap();
        assert_eq!(applied.metadata.resource_version, 1);
        let reapplied = store.apply_pipeline(pipeline("default")).await.unwrap();
        assert_eq!(reapplied.metadata.resource_version, 2);

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, ObjectKind::Pipeline);
        assert_eq!(event.op, WatchOp::Applied);
        assert_eq!(event.name, "default");
    }

    #[tokio::test]
    async fn patch_status_rejects_stale_revision() {
        let store = MemoryStore::new();
        let applied = store.apply_pipeline(pipeline("default")).await.unwrap();

        let err = store
            .patch_pipeline_status(
                SchedulingDomain::Compute,
                "default",
                applied.metadata.resource_version + 1,
                PipelineStatus::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let patched = store
            .patch_pipeline_status(
                SchedulingDomain::Compute,
                "default",
                applied.metadata.resource_version,
                PipelineStatus::default(),
            )
            .await
            .unwrap();
        assert_eq!(
            patched.metadata.resource_version,
            applied.metadata.resource_version + 1
        );
    }

    #[tokio::test]
    async fn patch_status_only_touches_status() {
        let store = MemoryStore::new();
        let mut object = pipeline("default");
        object.spec.create_decisions = true;
        let applied = store.apply_pipeline(object).await.unwrap();

        let mut status = PipelineStatus::default();
        status.conditions.push(cortex_config::conditions::Condition::ready(
            cortex_config::conditions::ConditionStatus::True,
            cortex_config::conditions::REASON_READY,
            "built",
        ));
        let patched = store
            .patch_pipeline_status(
                SchedulingDomain::Compute,
                "default",
                applied.metadata.resource_version,
                status,
            )
            .await
            .unwrap();
        assert!(patched.spec.create_decisions);
        assert_eq!(patched.status.conditions.len(), 1);
    }

    #[tokio::test]
    async fn listing_is_domain_scoped_and_sorted() {
        let store = MemoryStore::new();
        let _ = store.apply_pipeline(pipeline("zeta")).await.unwrap();
        let _ = store.apply_pipeline(pipeline("alpha")).await.unwrap();
        let mut foreign = pipeline("other");
        foreign.metadata.domain = SchedulingDomain::BlockStorage;
        let _ = store.apply_pipeline(foreign).await.unwrap();

        let listed = store
            .list_pipelines(SchedulingDomain::Compute)
            .await
            .unwrap();
        let names: Vec<_> = listed.iter().map(|o| o.metadata.name.as_str()).collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        let _ = store.apply_pipeline(pipeline("default")).await.unwrap();
        store
            .delete_pipeline(SchedulingDomain::Compute, "default")
            .await
            .unwrap();
        store
            .delete_pipeline(SchedulingDomain::Compute, "default")
            .await
            .unwrap();
        assert!(
            store
                .get_pipeline(SchedulingDomain::Compute, "default")
                .await
                .unwrap()
                .is_none()
        );
    }
}
