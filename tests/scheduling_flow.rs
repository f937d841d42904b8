// SPDX-License-Identifier: Apache-2.0

//! End-to-end flow over the in-memory stores: declarative objects go in,
//! the readiness controller activates pipelines, and the scheduling API
//! serves re-ranked host lists.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use cortex_api::{AppState, api_router};
use cortex_config::SchedulingDomain;
use cortex_config::conditions::{Condition, ConditionStatus};
use cortex_config::objects::{
    KnowledgeObject, KnowledgeSpec, KnowledgeStatus, ObjectMeta, PipelineObject, PipelineSpec,
    PipelineStatus, StepSpec,
};
use cortex_config::settings::ApiSettings;
use cortex_controller::ReadinessController;
use cortex_engine::builder::PipelineBuilder;
use cortex_engine::{PipelineRegistry, PluginIndex, StepContext};
use cortex_steps::{HOST_UTILIZATION_HANDLE, noop_filter, cpu_utilization_weigher};
use cortex_store::{ControlPlaneStore, HandleTable, MemoryKnowledgeStore, MemoryStore};
use cortex_telemetry::{ApiMetrics, ControllerMetrics, EngineMetrics, MetricsHandle};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const DOMAIN: SchedulingDomain = SchedulingDomain::Compute;

struct World {
    store: Arc<MemoryStore>,
    registry: PipelineRegistry,
    router: Router,
    cancel: CancellationToken,
}

impl Drop for World {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn start() -> World {
    let store = Arc::new(MemoryStore::new());
    let knowledge = Arc::new(MemoryKnowledgeStore::new());
    knowledge.set_table(
        "feature_host_utilization_v2",
        vec![
            json!({"host": "node001", "cpu_used_pct": 90.0}),
            json!({"host": "node002", "cpu_used_pct": 10.0}),
        ],
    );
    let handles = HandleTable::new();
    let registry = PipelineRegistry::new();
    let metrics = MetricsHandle::new(&BTreeMap::new()).unwrap();

    let controller = ReadinessController::new(
        DOMAIN,
        store.clone() as Arc<dyn ControlPlaneStore>,
        PipelineBuilder::new(
            Arc::new(PluginIndex::from_registered()),
            StepContext {
                domain: DOMAIN,
                knowledge,
                handles: handles.clone(),
            },
        ),
        handles,
        registry.clone(),
        ControllerMetrics::new(&metrics).unwrap(),
    );
    let cancel = CancellationToken::new();
    let _task = tokio::spawn(controller.run(cancel.clone()));

    let state = AppState::new(
        registry.clone(),
        None,
        ApiSettings::default(),
        ApiMetrics::new(&metrics).unwrap(),
        EngineMetrics::new(&metrics).unwrap(),
        cancel.clone(),
    );
    World {
        store,
        registry,
        router: api_router(state),
        cancel,
    }
}

fn pipeline_object() -> PipelineObject {
    PipelineObject {
        metadata: ObjectMeta::new("default", DOMAIN),
        spec: PipelineSpec {
            pipeline_type: "external".to_owned(),
            filters: vec![StepSpec {
                plugin: noop_filter::NOOP_FILTER_PLUGIN.to_owned(),
                name: None,
                params: serde_json::Value::Null,
                knowledge: Vec::new(),
            }],
            weighers: vec![StepSpec {
                plugin: cpu_utilization_weigher::CPU_UTILIZATION_WEIGHER_PLUGIN.to_owned(),
                name: None,
                params: json!({"multiplier": 10.0}),
                knowledge: Vec::new(),
            }],
            create_decisions: false,
        },
        status: PipelineStatus::default(),
    }
}

fn utilization_knowledge(ready: bool) -> KnowledgeObject {
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
        metadata: ObjectMeta::new(HOST_UTILIZATION_HANDLE, DOMAIN),
        spec: KnowledgeSpec {
            table: "feature_host_utilization_v2".to_owned(),
            schema_version: 2,
        },
        status,
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

async fn post_schedule(router: &Router, body: serde_json::Value) -> (StatusCode, String) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scheduler/nova/external")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn placement_request() -> serde_json::Value {
    json!({
        "spec": {"instance_uuid": "inst-1"},
        "context": {},
        "hosts": [{"host_id": "node001"}, {"host_id": "node002"}],
        "weights": {"node001": 1.0, "node002": 1.0},
        "pipeline": "default",
        "rebuild": false
    })
}

#[tokio::test]
async fn declarative_pipeline_serves_requests_once_knowledge_is_ready() {
    let world = start();

    // The pipeline waits for its knowledge handle.
    let _ = world
        .store
        .apply_pipeline(pipeline_object())
        .await
        .unwrap();
    let (status, body) = post_schedule(&world.router, placement_request()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "failed to process scheduling request");

    // Publishing the handle activates it; the busy host ranks last.
    let _ = world
        .store
        .apply_knowledge(utilization_knowledge(true))
        .await
        .unwrap();
    eventually("pipeline ready", async || {
        world.registry.is_ready(DOMAIN, "default")
    })
    .await;

    let (status, body) = post_schedule(&world.router, placement_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"hosts": ["node002", "node001"]}).to_string());

    // Every returned host is a candidate host.
    let document: serde_json::Value = serde_json::from_str(&body).unwrap();
    let returned: Vec<&str> = document["hosts"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(returned.iter().all(|h| ["node001", "node002"].contains(h)));
}

#[tokio::test]
async fn knowledge_flip_takes_the_pipeline_out_of_service() {
    let world = start();
    let _ = world
        .store
        .apply_pipeline(pipeline_object())
        .await
        .unwrap();
    let _ = world
        .store
        .apply_knowledge(utilization_knowledge(true))
        .await
        .unwrap();
    eventually("pipeline ready", async || {
        world.registry.is_ready(DOMAIN, "default")
    })
    .await;

    let _ = world
        .store
        .apply_knowledge(utilization_knowledge(false))
        .await
        .unwrap();
    eventually("pipeline drained", async || {
        !world.registry.is_ready(DOMAIN, "default")
    })
    .await;

    let (status, body) = post_schedule(&world.router, placement_request()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "failed to process scheduling request");
}
